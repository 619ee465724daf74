use core::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Streaming, metadata::MetadataValue, transport::Channel};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};
use warden_core::{
    proto::{
        Event, Nothing, StatInterval, admin_client::AdminClient, biz_client::BizClient,
    },
    types::{ADMIN_LOGGING, BIZ_ADD, BIZ_CHECK, CONSUMER_METADATA_KEY},
};
use warden_server::server::{
    config::ServerConfig,
    lifecycle::{self, RunningServer},
};

const POLICY: &str = r#"{
    "alice": ["/warden.Biz/Check"],
    "biz_admin": ["/warden.Biz/*"],
    "auditor": ["/warden.Admin/*"]
}"#;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    server: RunningServer,
    token: CancellationToken,
    channel: Channel,
}

impl Harness {
    async fn start() -> Self {
        let token = CancellationToken::new();
        let server = lifecycle::start(ServerConfig::new("127.0.0.1:0", POLICY), token.clone())
            .await
            .unwrap();
        let channel = Channel::from_shared(format!("http://{}", server.local_addr()))
            .unwrap()
            .connect()
            .await
            .unwrap();
        Self {
            server,
            token,
            channel,
        }
    }

    fn biz(&self) -> BizClient<Channel> {
        BizClient::new(self.channel.clone())
    }

    fn admin(&self) -> AdminClient<Channel> {
        AdminClient::new(self.channel.clone())
    }

    async fn logging(&self, consumer: &'static str) -> Streaming<Event> {
        self.admin()
            .logging(as_consumer(consumer, Nothing {}))
            .await
            .unwrap()
            .into_inner()
    }

    async fn stop(self) {
        self.token.cancel();
        tokio::time::timeout(TIMEOUT, self.server.wait())
            .await
            .unwrap()
            .unwrap();
    }
}

fn as_consumer<T>(consumer: &'static str, message: T) -> Request<T> {
    let mut req = Request::new(message);
    req.metadata_mut()
        .insert(CONSUMER_METADATA_KEY, MetadataValue::from_static(consumer));
    req
}

async fn next_event(stream: &mut Streaming<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

async fn drain(stream: &mut Streaming<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(TIMEOUT, stream.message())
        .await
        .unwrap()
        .unwrap()
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn authorized_calls_are_counted_and_denied_calls_are_not() {
    let harness = Harness::start().await;
    let mut biz = harness.biz();

    biz.check(as_consumer("alice", Nothing {})).await.unwrap();
    let denied = biz.add(as_consumer("alice", Nothing {})).await.unwrap_err();
    assert_eq!(denied.code(), Code::PermissionDenied);

    let mut stats = harness
        .admin()
        .statistics(as_consumer("auditor", StatInterval { interval_seconds: 1 }))
        .await
        .unwrap()
        .into_inner();
    let stat = tokio::time::timeout(TIMEOUT, stats.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(stat.by_method.get(BIZ_CHECK), Some(&1));
    assert_eq!(stat.by_method.get(BIZ_ADD), None);
    assert_eq!(stat.by_consumer.get("alice"), Some(&1));
    assert!(stat.timestamp > 0);

    drop(stats);
    harness.stop().await;
}

#[tokio::test]
async fn calls_need_exactly_one_consumer() {
    let harness = Harness::start().await;
    let mut biz = harness.biz();

    let missing = biz.check(Request::new(Nothing {})).await.unwrap_err();
    assert_eq!(missing.code(), Code::Unauthenticated);

    let mut req = as_consumer("alice", Nothing {});
    req.metadata_mut()
        .append(CONSUMER_METADATA_KEY, MetadataValue::from_static("biz_admin"));
    let duplicated = biz.check(req).await.unwrap_err();
    assert_eq!(duplicated.code(), Code::Unauthenticated);

    let unknown = biz
        .check(as_consumer("mallory", Nothing {}))
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::PermissionDenied);

    harness.stop().await;
}

#[tokio::test]
async fn service_wildcard_covers_only_its_service() {
    let harness = Harness::start().await;
    let mut biz = harness.biz();

    biz.check(as_consumer("biz_admin", Nothing {})).await.unwrap();
    biz.add(as_consumer("biz_admin", Nothing {})).await.unwrap();
    biz.test(as_consumer("biz_admin", Nothing {})).await.unwrap();

    let err = harness
        .admin()
        .logging(as_consumer("biz_admin", Nothing {}))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Code::PermissionDenied);

    harness.stop().await;
}

#[tokio::test]
async fn log_stream_sees_only_authorized_calls() {
    let harness = Harness::start().await;
    let mut log = harness.logging("auditor").await;

    let initial = next_event(&mut log).await;
    assert_eq!(initial.consumer, "auditor");
    assert_eq!(initial.method, ADMIN_LOGGING);
    assert!(initial.host.starts_with("127.0.0.1:"));

    let mut biz = harness.biz();
    biz.add(as_consumer("alice", Nothing {})).await.unwrap_err();
    biz.check(Request::new(Nothing {})).await.unwrap_err();
    biz.check(as_consumer("alice", Nothing {})).await.unwrap();

    let event = next_event(&mut log).await;
    assert_eq!(event.consumer, "alice");
    assert_eq!(event.method, BIZ_CHECK);

    harness.stop().await;
    assert!(drain(&mut log).await.is_empty());
}

#[tokio::test]
async fn shutdown_ends_every_log_stream_after_delivering_all_events() {
    let harness = Harness::start().await;

    let mut first = harness.logging("auditor").await;
    assert_eq!(next_event(&mut first).await.method, ADMIN_LOGGING);
    let mut second = harness.logging("auditor").await;
    assert_eq!(next_event(&mut second).await.method, ADMIN_LOGGING);

    let mut biz = harness.biz();
    for _ in 0..3 {
        biz.check(as_consumer("alice", Nothing {})).await.unwrap();
    }

    harness.token.cancel();
    let (first, second) = tokio::join!(drain(&mut first), drain(&mut second));

    // The first subscriber also observed the second one attaching.
    assert_eq!(first.len(), 4);
    assert_eq!(first[0].method, ADMIN_LOGGING);
    assert_eq!(second.len(), 3);
    for events in [&first[1..], &second[..]] {
        assert!(events.iter().all(|e| e.method == BIZ_CHECK && e.consumer == "alice"));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    tokio::time::timeout(TIMEOUT, harness.server.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn statistics_rejects_a_zero_interval() {
    let harness = Harness::start().await;

    let err = harness
        .admin()
        .statistics(as_consumer("auditor", StatInterval { interval_seconds: 0 }))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Code::InvalidArgument);

    harness.stop().await;
}

#[tokio::test]
async fn health_checks_bypass_the_access_policy() {
    let harness = Harness::start().await;

    let response = HealthClient::new(harness.channel.clone())
        .check(HealthCheckRequest {
            service: "warden.Biz".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status(), ServingStatus::Serving);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_policy_never_binds() {
    let err = lifecycle::start(
        ServerConfig::new("127.0.0.1:0", "{not json"),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("invalid access policy"));
}
