// Travel distribution gateway
// Typed client for an external flight/hotel supplier: credential caching, request and
// response normalization, retries with backoff, and an audit trail of every attempt.

pub mod audit;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod model;
pub mod request;
pub mod response;
pub mod transport;

// Re-export key types for convenience
pub use audit::{AuditLogger, AuditOutcome, AuditRecord, AuditSink, MemoryAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GatewayConfig, Masked, RetryConfig, TimeoutConfig};
pub use credential::{Authenticator, Credential, CredentialCache, CredentialStore};
pub use error::{ConfigError, GatewayError, OperationError, TransportError};
pub use executor::{CallContext, ExecuteOptions, OperationState, ResilientExecutor};
pub use gateway::{CallOptions, GatewayStatsSnapshot, TravelGateway, TravelGatewayBuilder};
pub use model::Operation;
pub use transport::{HttpTransport, Transport, UpstreamRawResponse, UpstreamRequest};
