//! Error types for the warden service.
//!
//! This module defines the central `Error` enum shared by the policy loader,
//! the interceptor chain, the event hub and the statistics aggregator. It
//! implements `From<Error>` for `tonic::Status` so every failure reaches the
//! client with the appropriate status code.
//!
//! ## Error Cases
//! - `Unauthenticated`: The `consumer` metadata key is missing or malformed.
//! - `PermissionDenied`: The consumer may not call the requested method.
//! - `InvalidAcl`: The access-control policy could not be loaded.
//! - `InvalidRequest`: The client request was malformed.
//! - `SubscriberLagged`: A log subscriber fell behind and was evicted.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//! - `ChannelError`: An internal communication failure between tasks.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the warden service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Caller identity could not be resolved from call metadata.
    #[error("Unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// The consumer has no policy entry allowing the method.
    #[error("Consumer `{consumer}` may not call `{method}`")]
    PermissionDenied { consumer: String, method: String },

    /// The access-control policy document is malformed.
    #[error("Invalid ACL: {reason}")]
    InvalidAcl { reason: String },

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A log subscriber's queue overflowed and it was dropped from the hub.
    #[error("Log subscriber fell behind and was disconnected")]
    SubscriberLagged,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthenticated { reason } => Status::unauthenticated(reason),
            Error::PermissionDenied { consumer, method } => Status::permission_denied(format!(
                "consumer `{consumer}` may not call `{method}`"
            )),
            Error::InvalidAcl { reason } => Status::internal(format!("Invalid ACL: {reason}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::SubscriberLagged => {
                Status::resource_exhausted("Log subscriber fell behind and was disconnected")
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
        }
    }
}
