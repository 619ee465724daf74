//! Shared protocol bindings, policy and types used by both the server and its
//! clients.
//!
//! - [`proto`] - Generated message and service definitions.
//! - [`acl`] - Static access-control policy.
//! - [`types`] - Domain types exchanged between server components.
//! - [`error`] - The crate-wide [`Error`] and its gRPC status mapping.

pub mod acl;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/warden.proto`.
///
/// - [`admin_server`](proto::admin_server) / [`admin_client`](proto::admin_client):
///   `Logging` and `Statistics` streams.
/// - [`biz_server`](proto::biz_server) / [`biz_client`](proto::biz_client):
///   `Check`, `Add` and `Test`.
pub mod proto {
    tonic::include_proto!("warden");

    /// Encoded descriptor set for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("warden_descriptor");
}
