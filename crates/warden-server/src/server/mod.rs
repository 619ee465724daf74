//! Server internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI / environment configuration.
//! - [`context`] - state shared by the interceptor chain and handlers.
//! - [`access`] - interceptor chain applied to every call.
//! - [`hub`] - fan-out of invocation events to log subscribers.
//! - [`stats`] - call counters and periodic snapshots.
//! - [`service`] - `Biz` and `Admin` gRPC handlers.
//! - [`lifecycle`] - bind, serve and graceful shutdown.
//! - [`telemetry`] - tracing subscriber and optional OpenTelemetry export.

pub mod access;
pub mod config;
pub mod context;
pub mod hub;
pub mod lifecycle;
pub mod service;
pub mod stats;
pub mod telemetry;
