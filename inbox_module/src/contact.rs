//! Sender identity normalization.
//!
//! Inbound webhooks carry a raw sender string that is either an email address or
//! a phone number in whatever format the provider chose. [`normalize_contact`] is
//! the lenient classifier used on the webhook path; [`canonical_phone`] is the
//! strict canonicalizer used when client records are written, so stored phones
//! share one form.

use std::fmt;

pub const DEFAULT_COUNTRY_CODE: &str = "233";

const SUBSCRIBER_DIGITS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Contact {
    Email(String),
    Phone(String),
}

impl Contact {
    pub fn email(&self) -> Option<&str> {
        match self {
            Contact::Email(value) => Some(value),
            Contact::Phone(_) => None,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            Contact::Phone(value) => Some(value),
            Contact::Email(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Contact::Email(value) | Contact::Phone(value) => value,
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contact::Email(value) => write!(f, "email:{}", value),
            Contact::Phone(value) => write!(f, "phone:{}", value),
        }
    }
}

/// Classify a raw sender as email (contains `@`) or phone, and canonicalize it.
pub fn normalize_contact(raw: &str) -> Option<Contact> {
    if raw.contains('@') {
        normalize_email(raw).map(Contact::Email)
    } else {
        normalize_phone(raw).map(Contact::Phone)
    }
}

/// Lowercase and trim, reducing `Name <addr>` and `mailto:` forms to the address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>')) {
        if start < end {
            value = &value[start + 1..end];
        }
    }
    let value = value.trim();
    let value = value.strip_prefix("mailto:").unwrap_or(value).trim();
    let (local, domain) = value.split_once('@')?;
    if local.trim().is_empty() || domain.trim().is_empty() {
        return None;
    }
    Some(value.to_lowercase())
}

/// Keep digits and a leading `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

/// Map a local or international phone number onto `<country code><9 digits>`.
///
/// Returns `None` when fewer than nine digits are present.
pub fn canonical_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|ch| ch.is_ascii_digit()).collect();
    let full_len = country_code.len() + SUBSCRIBER_DIGITS;

    if digits.len() == full_len && digits.starts_with(country_code) {
        return Some(digits);
    }
    if digits.len() == SUBSCRIBER_DIGITS + 1 && digits.starts_with('0') {
        return Some(format!("{}{}", country_code, &digits[1..]));
    }
    if digits.len() == SUBSCRIBER_DIGITS {
        return Some(format!("{}{}", country_code, digits));
    }
    if digits.len() > SUBSCRIBER_DIGITS {
        let subscriber = &digits[digits.len() - SUBSCRIBER_DIGITS..];
        return Some(format!("{}{}", country_code, subscriber));
    }
    None
}

/// Stored forms an inbound phone may match: as received, canonical, and
/// canonical with a `+`.
pub fn phone_lookup_candidates(phone: &str, country_code: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut push = |value: String| {
        if !value.is_empty() && !candidates.contains(&value) {
            candidates.push(value);
        }
    };
    push(phone.to_string());
    if let Some(canonical) = canonical_phone(phone, country_code) {
        push(format!("+{}", canonical));
        push(canonical);
    }
    candidates
}
