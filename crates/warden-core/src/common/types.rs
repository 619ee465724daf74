//! # Shared Domain Types and Constants
//!
//! Types exchanged between the interceptor chain, the event hub and the
//! statistics aggregator, plus the fully-qualified names of every method the
//! service exposes.
//!
//! ## Overview
//!
//! - [`InvocationEvent`] - One authorized call, as observed by the
//!   interceptor.
//! - [`Snapshot`] - A point-in-time copy of the call counters.
//! - [`CONSUMER_METADATA_KEY`] - Metadata key carrying the caller identity.
//!
//! Both domain types convert into their wire counterparts ([`proto::Event`],
//! [`proto::Stat`]) at the stream edge so the hub and aggregator never depend
//! on generated code.

use crate::proto;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata key that carries the caller identity on every call.
pub const CONSUMER_METADATA_KEY: &str = "consumer";

/// `Admin.Logging`
pub const ADMIN_LOGGING: &str = "/warden.Admin/Logging";
/// `Admin.Statistics`
pub const ADMIN_STATISTICS: &str = "/warden.Admin/Statistics";
/// `Biz.Check`
pub const BIZ_CHECK: &str = "/warden.Biz/Check";
/// `Biz.Add`
pub const BIZ_ADD: &str = "/warden.Biz/Add";
/// `Biz.Test`
pub const BIZ_TEST: &str = "/warden.Biz/Test";

/// Seconds since the Unix epoch, saturating to zero if the clock is set
/// before 1970.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// A single authorized call.
///
/// Created once by the interceptor chain and never mutated afterwards. The
/// hub shares one allocation between all subscriber queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationEvent {
    pub timestamp: i64,
    pub consumer: String,
    pub method: String,
    pub host: String,
}

impl InvocationEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        consumer: impl Into<String>,
        method: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: unix_timestamp(),
            consumer: consumer.into(),
            method: method.into(),
            host: host.into(),
        }
    }
}

impl From<&InvocationEvent> for proto::Event {
    fn from(event: &InvocationEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            consumer: event.consumer.clone(),
            method: event.method.clone(),
            host: event.host.clone(),
        }
    }
}

impl From<InvocationEvent> for proto::Event {
    fn from(event: InvocationEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            consumer: event.consumer,
            method: event.method,
            host: event.host,
        }
    }
}

/// Deep copy of the call counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: i64,
    pub by_method: HashMap<String, u64>,
    pub by_consumer: HashMap<String, u64>,
}

impl From<Snapshot> for proto::Stat {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            by_method: snapshot.by_method,
            by_consumer: snapshot.by_consumer,
        }
    }
}
