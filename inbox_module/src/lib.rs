pub mod access;
pub mod adapters;
pub mod audit_log;
pub mod channel;
pub mod config;
pub mod contact;
pub mod gateway;
pub mod ingestion;
pub mod locks;
pub mod models;
pub mod resolver;
pub mod signature;
pub mod store;
pub mod threads;

pub use access::{AccessGuard, Actor, ActorRole, ThreadAction};
pub use channel::Channel;
pub use config::{ConfigError, InboxConfig};
pub use ingestion::{IngestError, IngestOutcome, IngestionPipeline};
pub use threads::{ThreadError, ThreadService};
