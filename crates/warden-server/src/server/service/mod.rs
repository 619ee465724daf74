//! gRPC service implementations.
//!
//! Both services sit behind [`AccessLayer`], so by the time a handler runs
//! the caller is authenticated, authorized and already recorded.
//!
//! ## Structure
//!
//! - [`biz`] - no-op business RPCs (`BizService`).
//! - [`admin`] - audit log and statistics streams (`AdminService`).
//!
//! [`AccessLayer`]: crate::server::access::AccessLayer

pub mod admin;
pub mod biz;
