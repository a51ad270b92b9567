use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::contact::DEFAULT_COUNTRY_CODE;
use crate::signature::SignatureVerifier;
use crate::store::{InboxStore, PostgresInboxStore, SqliteInboxStore, StoreError};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9200;
const DEFAULT_SQLITE_PATH: &str = ".inbox/inbox.db";
const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("WEBHOOK_SECRET is required outside development mode (set INBOX_ENV=development or INBOX_ALLOW_UNSIGNED_WEBHOOKS=true to accept unsigned webhooks)")]
    MissingSecret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(ConfigError::Invalid(format!("unknown INBOX_ENV: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite {
        path: PathBuf,
    },
    Postgres {
        url: String,
        allow_invalid_certs: bool,
    },
}

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub webhook_secret: Option<String>,
    pub allow_unsigned: bool,
    pub whatsapp_verify_token: Option<String>,
    pub store: StoreBackend,
    pub max_body_bytes: usize,
    pub default_country_code: String,
}

#[derive(Debug, Deserialize, Default)]
struct InboxConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    webhooks: WebhookSection,
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    contacts: ContactSection,
}

#[derive(Debug, Deserialize, Default)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    environment: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct WebhookSection {
    allow_unsigned: Option<bool>,
    whatsapp_verify_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreSection {
    backend: Option<String>,
    sqlite_path: Option<String>,
    db_url: Option<String>,
    allow_invalid_certs: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ContactSection {
    default_country_code: Option<String>,
}

impl InboxConfig {
    /// Reads `INBOX_CONFIG_PATH` (or `./inbox.toml` when present), then lets
    /// environment variables override individual settings. The webhook secret
    /// is only ever read from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match resolve_config_path()? {
            Some(path) => load_config_file(&path)?,
            None => InboxConfigFile::default(),
        };
        Self::from_file_and_env(file)
    }

    fn from_file_and_env(file: InboxConfigFile) -> Result<Self, ConfigError> {
        let host = env_var_non_empty("INBOX_HOST")
            .or(file.server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match env_var_non_empty("INBOX_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("INBOX_PORT is not a port: {}", raw)))?,
            None => file.server.port.unwrap_or(DEFAULT_PORT),
        };
        let environment = match env_var_non_empty("INBOX_ENV").or(file.server.environment) {
            Some(raw) => Environment::parse(&raw)?,
            None => Environment::default(),
        };
        let max_body_bytes = env_var_non_empty("INBOX_MAX_BODY_BYTES")
            .and_then(|value| value.parse::<usize>().ok())
            .or(file.server.max_body_bytes)
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        let allow_unsigned = env_flag(
            "INBOX_ALLOW_UNSIGNED_WEBHOOKS",
            file.webhooks.allow_unsigned.unwrap_or(false),
        );
        let whatsapp_verify_token =
            env_var_non_empty("WHATSAPP_VERIFY_TOKEN").or(file.webhooks.whatsapp_verify_token);

        let backend = env_var_non_empty("INBOX_STORE")
            .or(file.store.backend)
            .unwrap_or_else(|| "sqlite".to_string());
        let store = match backend.to_ascii_lowercase().as_str() {
            "sqlite" => {
                let raw = env_var_non_empty("INBOX_SQLITE_PATH")
                    .or(file.store.sqlite_path)
                    .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
                StoreBackend::Sqlite {
                    path: resolve_path(raw)?,
                }
            }
            "postgres" | "postgresql" => {
                let url = env_var_non_empty("INBOX_DB_URL")
                    .or_else(|| env_var_non_empty("DATABASE_URL"))
                    .or(file.store.db_url)
                    .ok_or_else(|| {
                        ConfigError::Invalid(
                            "INBOX_DB_URL or DATABASE_URL must be set for the postgres store"
                                .to_string(),
                        )
                    })?;
                StoreBackend::Postgres {
                    url,
                    allow_invalid_certs: env_flag(
                        "INBOX_DB_TLS_ALLOW_INVALID_CERTS",
                        file.store.allow_invalid_certs.unwrap_or(false),
                    ),
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown INBOX_STORE backend: {}",
                    other
                )))
            }
        };

        let default_country_code = env_var_non_empty("INBOX_DEFAULT_COUNTRY_CODE")
            .or(file.contacts.default_country_code)
            .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string());
        if default_country_code.is_empty()
            || !default_country_code.chars().all(|ch| ch.is_ascii_digit())
        {
            return Err(ConfigError::Invalid(format!(
                "default country code must be digits: {}",
                default_country_code
            )));
        }

        let config = Self {
            host,
            port,
            environment,
            webhook_secret: env_var_non_empty("WEBHOOK_SECRET"),
            allow_unsigned,
            whatsapp_verify_token,
            store,
            max_body_bytes,
            default_country_code,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn unsigned_allowed(&self) -> bool {
        self.allow_unsigned || self.environment == Environment::Development
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.is_none() && !self.unsigned_allowed() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(())
    }

    pub fn signature_verifier(&self) -> SignatureVerifier {
        match &self.webhook_secret {
            Some(secret) => SignatureVerifier::new(secret.clone()),
            None => SignatureVerifier::unsigned(),
        }
    }

    /// Opens the configured backend. Blocking; call from `spawn_blocking`
    /// inside an async runtime.
    pub fn open_store(&self) -> Result<Arc<dyn InboxStore>, StoreError> {
        let store: Arc<dyn InboxStore> = match &self.store {
            StoreBackend::Sqlite { path } => Arc::new(
                SqliteInboxStore::new(path)?.with_country_code(&self.default_country_code),
            ),
            StoreBackend::Postgres {
                url,
                allow_invalid_certs,
            } => Arc::new(
                PostgresInboxStore::new(url, *allow_invalid_certs)?
                    .with_country_code(&self.default_country_code),
            ),
        };
        Ok(store)
    }
}

fn resolve_config_path() -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = env_var_non_empty("INBOX_CONFIG_PATH") {
        return Ok(Some(resolve_path(path)?));
    }
    let direct = env::current_dir()?.join("inbox.toml");
    Ok(direct.exists().then_some(direct))
}

fn load_config_file(path: &Path) -> Result<InboxConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<InboxConfigFile>(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 14] = [
        "INBOX_CONFIG_PATH",
        "INBOX_HOST",
        "INBOX_PORT",
        "INBOX_ENV",
        "WEBHOOK_SECRET",
        "INBOX_ALLOW_UNSIGNED_WEBHOOKS",
        "WHATSAPP_VERIFY_TOKEN",
        "INBOX_STORE",
        "INBOX_SQLITE_PATH",
        "INBOX_DB_URL",
        "DATABASE_URL",
        "INBOX_DB_TLS_ALLOW_INVALID_CERTS",
        "INBOX_MAX_BODY_BYTES",
        "INBOX_DEFAULT_COUNTRY_CODE",
    ];

    struct EnvGuard {
        key: String,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                previous,
            }
        }

        fn unset(key: &str) -> Self {
            let previous = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                previous,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => env::set_var(&self.key, value),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        KEYS.iter().map(|key| EnvGuard::unset(key)).collect()
    }

    #[test]
    fn missing_secret_fails_in_production() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let err = InboxConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));
    }

    #[test]
    fn development_mode_allows_unsigned_webhooks() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let _env = EnvGuard::set("INBOX_ENV", "development");
        let config = InboxConfig::from_env().unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.signature_verifier().is_enforced());
    }

    #[test]
    fn explicit_unsigned_flag_is_honored() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let _flag = EnvGuard::set("INBOX_ALLOW_UNSIGNED_WEBHOOKS", "yes");
        let config = InboxConfig::from_env().unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.allow_unsigned);
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let _secret = EnvGuard::set("WEBHOOK_SECRET", "s3cret");
        let config = InboxConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9200);
        assert_eq!(config.max_body_bytes, 25 * 1024 * 1024);
        assert_eq!(config.default_country_code, "233");
        assert!(config.signature_verifier().is_enforced());
        match config.store {
            StoreBackend::Sqlite { path } => assert!(path.ends_with(".inbox/inbox.db")),
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn env_overrides_config_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inbox.toml");
        std::fs::write(
            &path,
            r#"
[server]
host = "127.0.0.1"
port = 8080

[webhooks]
whatsapp_verify_token = "from-file"

[store]
backend = "postgres"
db_url = "postgres://file@localhost/inbox"

[contacts]
default_country_code = "44"
"#,
        )
        .unwrap();
        let _path = EnvGuard::set("INBOX_CONFIG_PATH", path.to_str().unwrap());
        let _secret = EnvGuard::set("WEBHOOK_SECRET", "s3cret");
        let _port = EnvGuard::set("INBOX_PORT", "9300");
        let _db = EnvGuard::set("DATABASE_URL", "postgres://env@localhost/inbox");

        let config = InboxConfig::from_env().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9300);
        assert_eq!(config.whatsapp_verify_token.as_deref(), Some("from-file"));
        assert_eq!(config.default_country_code, "44");
        assert_eq!(
            config.store,
            StoreBackend::Postgres {
                url: "postgres://env@localhost/inbox".to_string(),
                allow_invalid_certs: false,
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _clean = clean_env();
        let _secret = EnvGuard::set("WEBHOOK_SECRET", "s3cret");
        {
            let _store = EnvGuard::set("INBOX_STORE", "mongo");
            assert!(matches!(
                InboxConfig::from_env(),
                Err(ConfigError::Invalid(_))
            ));
        }
        {
            let _store = EnvGuard::set("INBOX_STORE", "postgres");
            assert!(matches!(
                InboxConfig::from_env(),
                Err(ConfigError::Invalid(_))
            ));
        }
        let _port = EnvGuard::set("INBOX_PORT", "not-a-port");
        assert!(matches!(
            InboxConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));
    }
}
