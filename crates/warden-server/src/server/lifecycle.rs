//! Startup, background serving and graceful shutdown.
//!
//! [`start`] does every fallible setup step synchronously (policy parsing,
//! then binding) so configuration mistakes surface to the caller before any
//! traffic is accepted. Serving then continues on a background task until the
//! shutdown token is cancelled.

use crate::server::{
    access::AccessLayer,
    config::ServerConfig,
    context::ServiceContext,
    service::{admin::AdminService, biz::BizService},
};
use anyhow::Context;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use warden_core::{
    acl::Acl,
    proto::{FILE_DESCRIPTOR_SET, admin_server::AdminServer, biz_server::BizServer},
};

/// Handle to a server accepting connections on a background task.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl RunningServer {
    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server to stop and reports how it stopped.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.handle
            .await
            .context("server task panicked")?
            .context("server terminated with an error")?;

        #[cfg(feature = "tracing")]
        tracing::info!("Service shut down successfully");
        Ok(())
    }
}

/// Parses the access policy, binds the listener and starts serving.
///
/// Cancelling `shutdown_token` marks the services NOT_SERVING, closes every
/// log and statistics stream, then lets in-flight calls drain.
///
/// # Errors
///
/// Fails without binding anything if the policy is malformed, and fails if
/// the address cannot be bound.
pub async fn start(
    config: ServerConfig,
    shutdown_token: CancellationToken,
) -> anyhow::Result<RunningServer> {
    let acl = Acl::from_json(&config.acl).context("invalid access policy")?;

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    let local_addr = listener.local_addr()?;

    log_startup_info(local_addr, &acl, &config);

    let context = ServiceContext::new(acl, &config, shutdown_token.clone());

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<BizServer<BizService>>().await;
    health_reporter.set_serving::<AdminServer<AdminService>>().await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let router = Server::builder()
        .http2_adaptive_window(Some(true))
        .layer(AccessLayer::new(context.clone()))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_biz_service())
        .add_service(build_admin_service(context.clone()));

    let handle = tokio::spawn(router.serve_with_incoming_shutdown(
        TcpListenerStream::new(listener),
        shutdown_signal(shutdown_token, context, health_reporter),
    ));

    Ok(RunningServer { local_addr, handle })
}

fn log_startup_info(_addr: SocketAddr, _acl: &Acl, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting warden on {} for consumers {:?} with full config: {:#?}",
            _addr,
            _acl.consumers().collect::<Vec<_>>(),
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting warden on {} with {} consumers in the access policy",
            _addr,
            _acl.len()
        );
    }
}

fn build_biz_service() -> BizServer<BizService> {
    BizServer::new(BizService)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn build_admin_service(context: ServiceContext) -> AdminServer<AdminService> {
    AdminServer::new(AdminService::new(context))
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    shutdown_token: CancellationToken,
    context: ServiceContext,
    health_reporter: HealthReporter,
) {
    shutdown_token.cancelled().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown requested, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<BizServer<BizService>>()
        .await;
    health_reporter
        .set_not_serving::<AdminServer<AdminService>>()
        .await;

    // 2. End every long-lived stream so the transport can drain
    context.shutdown().await;
}
