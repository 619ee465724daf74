//! Administrative streams: the live audit log and periodic statistics.

use crate::server::{access::Caller, context::ServiceContext};
use core::pin::Pin;
use core::time::Duration;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use tonic::{Request, Response, Status};
use warden_core::{
    proto::{Event, Nothing, Stat, StatInterval, admin_server::Admin},
    types::{ADMIN_LOGGING, InvocationEvent},
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Status>> + Send>>;
pub type StatStream = Pin<Box<dyn Stream<Item = Result<Stat, Status>> + Send>>;

#[derive(Clone)]
pub struct AdminService {
    context: ServiceContext,
}

impl AdminService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }
}

#[tonic::async_trait]
impl Admin for AdminService {
    type LoggingStream = EventStream;
    type StatisticsStream = StatStream;

    /// Streams every authorized call made after this one.
    ///
    /// The first message describes the subscription itself. The stream ends
    /// when the service shuts down, or with `RESOURCE_EXHAUSTED` if this
    /// subscriber falls too far behind.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn logging(&self, req: Request<Nothing>) -> Result<Response<Self::LoggingStream>, Status> {
        let caller = Caller::from_request(&req)?.clone();
        let subscription = self.context.hub().register()?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            consumer = %caller.consumer,
            host = %caller.host,
            "Log subscriber {} attached",
            subscription.id()
        );

        let initial = Event::from(InvocationEvent::new(
            caller.consumer,
            ADMIN_LOGGING,
            caller.host,
        ));
        let events = subscription
            .map_ok(|event| Event::from(&*event))
            .map_err(Status::from);

        Ok(Response::new(Box::pin(
            stream::once(async move { Ok(initial) }).chain(events),
        )))
    }

    /// Streams a snapshot of the call counters every `interval_seconds`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(interval = req.get_ref().interval_seconds)))]
    async fn statistics(
        &self,
        req: Request<StatInterval>,
    ) -> Result<Response<Self::StatisticsStream>, Status> {
        let interval = Duration::from_secs(req.get_ref().interval_seconds);
        let snapshots = self.context.stats().subscribe(interval)?;

        Ok(Response::new(Box::pin(snapshots.map(|s| Ok(Stat::from(s))))))
    }
}
