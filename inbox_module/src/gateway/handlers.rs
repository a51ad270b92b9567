use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::state::GatewayState;
use crate::channel::Channel;
use crate::ingestion::{IngestError, IngestOutcome};

#[derive(Debug, Deserialize, Default)]
pub(super) struct WebhookParams {
    #[serde(rename = "orgId")]
    org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WhatsAppVerifyParams {
    #[serde(rename = "hub.mode")]
    hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    hub_challenge: Option<String>,
}

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn verify_whatsapp_webhook(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<WhatsAppVerifyParams>,
) -> impl IntoResponse {
    match verify_whatsapp_subscription(
        state.whatsapp_verify_token.as_deref(),
        params.hub_mode.as_deref(),
        params.hub_verify_token.as_deref(),
        params.hub_challenge.as_deref(),
    ) {
        Ok(challenge) => (StatusCode::OK, challenge),
        Err(reason) => {
            info!("whatsapp webhook verification failed: {}", reason);
            (StatusCode::FORBIDDEN, reason.to_string())
        }
    }
}

pub(super) async fn ingest_whatsapp(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<WebhookParams>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, Channel::WhatsApp, params, headers, body).await
}

pub(super) async fn ingest_sms(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<WebhookParams>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, Channel::Sms, params, headers, body).await
}

pub(super) async fn ingest_email(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<WebhookParams>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    ingest(state, Channel::Email, params, headers, body).await
}

async fn ingest(
    state: Arc<GatewayState>,
    channel: Channel,
    params: WebhookParams,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Err(err) = state.verifier.verify(&headers, &body) {
        warn!("rejected {} webhook: {}", channel, err);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "reason": err.reason()})),
        );
    }

    let org_hint = params
        .org_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || {
        pipeline.ingest(org_hint.as_deref(), channel, &body)
    })
    .await;

    match result {
        Ok(Ok(IngestOutcome::Accepted {
            thread_id,
            message_id,
            ..
        })) => (
            StatusCode::OK,
            Json(json!({"success": true, "threadId": thread_id, "messageId": message_id})),
        ),
        Ok(Ok(IngestOutcome::Duplicate { thread_id, .. })) => (
            StatusCode::OK,
            Json(json!({"success": true, "threadId": thread_id, "duplicate": true})),
        ),
        Ok(Ok(IngestOutcome::Unmatched)) => (
            StatusCode::OK,
            Json(json!({"success": false, "reason": "unmatched"})),
        ),
        Ok(Err(IngestError::MalformedPayload(detail))) => {
            info!("malformed {} webhook: {}", channel, detail);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "reason": "malformed_payload", "error": detail})),
            )
        }
        Ok(Err(IngestError::Store(err))) => {
            error!("failed to ingest {} webhook: {}", channel, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "reason": "processing_failed"})),
            )
        }
        Err(err) => {
            error!("{} ingestion task failed: {}", channel, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "reason": "processing_failed"})),
            )
        }
    }
}

fn verify_whatsapp_subscription(
    expected: Option<&str>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Result<String, &'static str> {
    let Some(expected) = expected.filter(|value| !value.trim().is_empty()) else {
        return Err("verify_token_not_configured");
    };
    if mode != Some("subscribe") {
        return Err("invalid_mode");
    }
    let provided = token.ok_or("missing_token")?;
    if provided != expected {
        return Err("token_mismatch");
    }
    challenge.map(|c| c.to_string()).ok_or("missing_challenge")
}
