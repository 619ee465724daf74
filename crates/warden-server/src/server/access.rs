//! Interceptor chain for every gRPC call.
//!
//! [`AccessLayer`] wraps the whole tonic router, so unary and streaming calls
//! pass through the same steps before any handler runs:
//!
//! 1. Resolve the caller from the single `consumer` metadata value
//!    (`UNAUTHENTICATED` otherwise).
//! 2. Check the fully-qualified method against the [`Acl`]
//!    (`PERMISSION_DENIED` otherwise).
//! 3. Record the call: bump the counters and publish an [`InvocationEvent`].
//! 4. Attach the resolved [`Caller`] to the request and hand it to the
//!    wrapped service. Its response is returned untouched.
//!
//! Rejected calls never reach the hub or the counters. Health checks and
//! reflection are infrastructure and bypass the chain.

use crate::server::{
    context::ServiceContext,
    telemetry::{increment_calls_authorized, increment_calls_rejected},
};
use core::task::{Context, Poll};
use futures::future::{Either, Ready, ready};
use tonic::{
    Status,
    body::Body,
    codegen::http,
    transport::server::TcpConnectInfo,
};
use tower::{Layer, Service};
use warden_core::{
    Error, Result,
    acl::Acl,
    types::{CONSUMER_METADATA_KEY, InvocationEvent},
};

/// Path prefixes served without access checks.
const BYPASS_PREFIXES: &[&str] = &["/grpc.health.v1.Health/", "/grpc.reflection."];

/// Host recorded when the transport does not expose a peer address.
const UNKNOWN_HOST: &str = "unknown";

/// Identity resolved by the interceptor, available to handlers through the
/// request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub consumer: String,
    pub host: String,
}

impl Caller {
    /// Reads the caller attached by [`AccessLayer`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] if the request did not pass through
    /// the interceptor chain.
    pub fn from_request<T>(req: &tonic::Request<T>) -> Result<&Self> {
        req.extensions()
            .get::<Self>()
            .ok_or_else(|| Error::Unauthenticated {
                reason: "caller identity not resolved".to_string(),
            })
    }
}

/// Resolves the caller of `req` and checks it against `acl`.
///
/// Returns `Ok(None)` for infrastructure paths that bypass the chain.
pub fn admit<B>(acl: &Acl, req: &http::Request<B>) -> Result<Option<Caller>> {
    let method = req.uri().path();
    if BYPASS_PREFIXES.iter().any(|p| method.starts_with(p)) {
        return Ok(None);
    }

    let mut values = req.headers().get_all(CONSUMER_METADATA_KEY).iter();
    let (Some(value), None) = (values.next(), values.next()) else {
        return Err(Error::Unauthenticated {
            reason: format!("expected exactly one `{CONSUMER_METADATA_KEY}` metadata value"),
        });
    };
    let consumer = value.to_str().map_err(|_| Error::Unauthenticated {
        reason: format!("`{CONSUMER_METADATA_KEY}` metadata is not valid ASCII"),
    })?;

    acl.authorize(consumer, method)?;

    let host = req
        .extensions()
        .get::<TcpConnectInfo>()
        .and_then(TcpConnectInfo::remote_addr)
        .map_or_else(|| UNKNOWN_HOST.to_string(), |addr| addr.to_string());

    Ok(Some(Caller {
        consumer: consumer.to_string(),
        host,
    }))
}

/// Tower layer applying the interceptor chain to every call.
#[derive(Clone)]
pub struct AccessLayer {
    context: ServiceContext,
}

impl AccessLayer {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }
}

impl<S> Layer<S> for AccessLayer {
    type Service = AccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessService {
            inner,
            context: self.context.clone(),
        }
    }
}

/// Service produced by [`AccessLayer`].
#[derive(Clone)]
pub struct AccessService<S> {
    inner: S,
    context: ServiceContext,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AccessService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Either<S::Future, Ready<core::result::Result<Self::Response, Self::Error>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<core::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        match admit(self.context.acl(), &req) {
            Ok(Some(caller)) => {
                let method = req.uri().path().to_string();
                #[cfg(feature = "tracing")]
                tracing::debug!(consumer = %caller.consumer, %method, "call authorized");
                increment_calls_authorized(&method);

                self.context.record(InvocationEvent::new(
                    caller.consumer.clone(),
                    method,
                    caller.host.clone(),
                ));
                req.extensions_mut().insert(caller);
                Either::Left(self.inner.call(req))
            }
            Ok(None) => Either::Left(self.inner.call(req)),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(method = %req.uri().path(), "call rejected: {e}");
                let status = Status::from(e);
                increment_calls_rejected(status.code());
                Either::Right(ready(Ok(status.into_http())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use core::convert::Infallible;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;
    use tonic::Code;
    use tower::{ServiceExt, util::BoxCloneService};
    use warden_core::types::{ADMIN_LOGGING, BIZ_ADD, BIZ_CHECK};

    const POLICY: &str = r#"{
        "alice": ["/warden.Biz/Check"],
        "admin": ["/warden.Biz/*", "/warden.Admin/Logging"]
    }"#;

    fn request(path: &str, consumers: &[&str]) -> http::Request<()> {
        let mut builder = http::Request::builder().uri(format!("http://localhost{path}"));
        for consumer in consumers {
            builder = builder.header(CONSUMER_METADATA_KEY, *consumer);
        }
        builder.body(()).unwrap()
    }

    fn context() -> ServiceContext {
        ServiceContext::new(
            Acl::from_json(POLICY).unwrap(),
            &ServerConfig::new("127.0.0.1:0", POLICY),
            CancellationToken::new(),
        )
    }

    /// Wraps a handler that counts its invocations and echoes the resolved
    /// caller back in a header.
    fn wrapped(
        context: &ServiceContext,
        calls: Arc<AtomicUsize>,
    ) -> AccessService<BoxCloneService<http::Request<()>, http::Response<Body>, Infallible>> {
        let handler = tower::service_fn(move |req: http::Request<()>| {
            calls.fetch_add(1, Ordering::SeqCst);
            let consumer = req
                .extensions()
                .get::<Caller>()
                .map(|c| c.consumer.clone())
                .unwrap_or_default();
            async move {
                let mut response = http::Response::new(Body::empty());
                response
                    .headers_mut()
                    .insert("x-caller", consumer.parse().unwrap());
                Ok::<_, Infallible>(response)
            }
        });
        AccessLayer::new(context.clone()).layer(BoxCloneService::new(handler))
    }

    fn grpc_code(response: &http::Response<Body>) -> Code {
        Status::from_header_map(response.headers()).map_or(Code::Ok, |s| s.code())
    }

    #[test]
    fn admits_exactly_one_consumer() {
        let acl = Acl::from_json(POLICY).unwrap();

        let caller = admit(&acl, &request(BIZ_CHECK, &["alice"])).unwrap().unwrap();
        assert_eq!(caller.consumer, "alice");
        assert_eq!(caller.host, UNKNOWN_HOST);

        for consumers in [&[][..], &["alice", "alice"][..]] {
            assert!(matches!(
                admit(&acl, &request(BIZ_CHECK, consumers)),
                Err(Error::Unauthenticated { .. })
            ));
        }
    }

    #[test]
    fn denies_methods_outside_the_policy() {
        let acl = Acl::from_json(POLICY).unwrap();
        assert!(matches!(
            admit(&acl, &request(BIZ_ADD, &["alice"])),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(matches!(
            admit(&acl, &request(BIZ_CHECK, &["mallory"])),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(admit(&acl, &request(BIZ_ADD, &["admin"])).unwrap().is_some());
    }

    #[test]
    fn infrastructure_paths_bypass_the_chain() {
        let acl = Acl::from_json(POLICY).unwrap();
        assert_eq!(
            admit(&acl, &request("/grpc.health.v1.Health/Check", &[])).unwrap(),
            None
        );
        assert_eq!(
            admit(
                &acl,
                &request("/grpc.reflection.v1.ServerReflection/ServerReflectionInfo", &[])
            )
            .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn authorized_call_is_recorded_before_the_handler() {
        let context = context();
        let mut log = context.hub().register().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let response = wrapped(&context, Arc::clone(&calls))
            .oneshot(request(BIZ_CHECK, &["alice"]))
            .await
            .unwrap();

        assert_eq!(grpc_code(&response), Code::Ok);
        assert_eq!(response.headers()["x-caller"], "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = context.stats().snapshot();
        assert_eq!(snapshot.by_method.get(BIZ_CHECK), Some(&1));
        assert_eq!(snapshot.by_consumer.get("alice"), Some(&1));

        let event = log.next().await.unwrap().unwrap();
        assert_eq!(event.consumer, "alice");
        assert_eq!(event.method, BIZ_CHECK);
    }

    #[tokio::test]
    async fn rejected_calls_leave_no_trace() {
        let context = context();
        let log = context.hub().register().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let cases = [
            (request(BIZ_ADD, &["alice"]), Code::PermissionDenied),
            (request(ADMIN_LOGGING, &["alice"]), Code::PermissionDenied),
            (request(BIZ_CHECK, &[]), Code::Unauthenticated),
            (request(BIZ_CHECK, &["alice", "admin"]), Code::Unauthenticated),
        ];
        for (req, expected) in cases {
            let response = wrapped(&context, Arc::clone(&calls))
                .oneshot(req)
                .await
                .unwrap();
            assert_eq!(grpc_code(&response), expected);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let snapshot = context.stats().snapshot();
        assert!(snapshot.by_method.is_empty());
        assert!(snapshot.by_consumer.is_empty());

        context.shutdown().await;
        assert_eq!(log.collect::<Vec<_>>().await.len(), 0);
    }
}
