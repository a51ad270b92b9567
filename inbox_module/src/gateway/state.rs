use std::sync::Arc;

use crate::ingestion::IngestionPipeline;
use crate::signature::SignatureVerifier;

#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<IngestionPipeline>,
    pub verifier: SignatureVerifier,
    pub whatsapp_verify_token: Option<String>,
}

impl GatewayState {
    pub fn new(pipeline: Arc<IngestionPipeline>, verifier: SignatureVerifier) -> Self {
        Self {
            pipeline,
            verifier,
            whatsapp_verify_token: None,
        }
    }

    pub fn with_whatsapp_verify_token(mut self, token: Option<String>) -> Self {
        self.whatsapp_verify_token = token;
        self
    }
}
