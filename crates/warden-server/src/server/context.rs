use crate::server::{config::ServerConfig, hub::EventHub, stats::StatsAggregator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_core::{acl::Acl, types::InvocationEvent};

/// State shared by the interceptor chain and every RPC handler.
///
/// Holds the access policy, the event hub and the statistics aggregator.
/// Cloning is cheap; all clones observe the same state and the same shutdown
/// token.
#[derive(Clone)]
pub struct ServiceContext {
    acl: Arc<Acl>,
    hub: EventHub,
    stats: StatsAggregator,
    shutdown_token: CancellationToken,
}

impl ServiceContext {
    /// Builds the context and spawns the hub's relay task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(acl: Acl, config: &ServerConfig, shutdown_token: CancellationToken) -> Self {
        Self {
            acl: Arc::new(acl),
            hub: EventHub::new(
                config.log_queue_capacity,
                config.shutdown_timeout,
                shutdown_token.clone(),
            ),
            stats: StatsAggregator::new(config.stats_buffer_size, shutdown_token.clone()),
            shutdown_token,
        }
    }

    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Accounts for one authorized call: bumps the counters and publishes
    /// the event to every log subscriber.
    pub fn record(&self, event: InvocationEvent) {
        self.stats.increment(&event.method, &event.consumer);
        self.hub.publish(event);
    }

    /// Cancels the shared token and waits for the hub to close every log
    /// stream. Statistics streams stop on the same token.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.hub.shutdown().await;
    }
}
