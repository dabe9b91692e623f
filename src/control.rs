//! Typed control plane between the presenter and the collection service.
//!
//! The protocol is asymmetric: the presenter fires requests into one
//! channel and consumes responses from another, never blocking on a
//! round-trip. The service consumes requests strictly in order, so
//! successive polling cycles cannot overlap at the source, and it owns
//! the rate state so samples reach the presenter already derived.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collector::{self, CollectError};
use crate::models::{DetailTable, ObjectKind, StatsSnapshot};
use crate::pool::{ConnectionIdentity, ConnectionPool, PgConnector};
use crate::rates::{RateSample, RateState};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Requests from the presenter. A closed set: anything the dashboard can
/// ask for is one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Collect a fresh snapshot.
    Refresh,
    /// Fetch the full listing for one object kind.
    ShowDetails(ObjectKind),
    /// Soft-cancel the query of a backend process.
    CancelQuery(i32),
    /// Hard-terminate a backend process.
    TerminateQuery(i32),
}

/// Responses to the presenter, delivered independently of the request
/// that caused them.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    /// A new sample; an idempotent overwrite of the dashboard state.
    StatsUpdated(Box<RateSample>),
    /// A drill-down listing.
    DetailResult(Box<DetailTable>),
    /// The polling cycle failed as a whole. Prior history stays valid.
    CollectionFailed(String),
    /// A cancel/terminate/drill-down command failed. Not retried.
    CommandFailed {
        action: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Channel pair
// ---------------------------------------------------------------------------

pub type RequestSender = mpsc::UnboundedSender<ControlRequest>;
pub type ResponseReceiver = mpsc::UnboundedReceiver<ControlResponse>;

/// Presenter-side endpoints.
pub struct ControlChannel {
    pub requests: RequestSender,
    pub responses: ResponseReceiver,
}

/// Service-side endpoints.
pub struct ServiceChannel {
    pub(crate) requests: mpsc::UnboundedReceiver<ControlRequest>,
    pub(crate) responses: mpsc::UnboundedSender<ControlResponse>,
}

/// Creates the channel pair connecting a presenter to a service.
///
/// Both directions are unbounded so neither side ever blocks on send;
/// backpressure is unnecessary because the presenter dispatches at most
/// one refresh at a time.
pub fn control_channel() -> (ControlChannel, ServiceChannel) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    (
        ControlChannel {
            requests: req_tx,
            responses: resp_rx,
        },
        ServiceChannel {
            requests: req_rx,
            responses: resp_tx,
        },
    )
}

// ---------------------------------------------------------------------------
// Stats source
// ---------------------------------------------------------------------------

/// What the service collects from. Abstracted so the loop is testable
/// with scripted sources.
pub trait StatsSource: Send + 'static {
    fn fetch_stats(&mut self) -> impl Future<Output = Result<StatsSnapshot, CollectError>> + Send;

    fn fetch_details(
        &mut self,
        kind: ObjectKind,
    ) -> impl Future<Output = Result<DetailTable, CollectError>> + Send;

    fn cancel_query(
        &mut self,
        pid: i32,
    ) -> impl Future<Output = Result<bool, CollectError>> + Send;

    fn terminate_query(
        &mut self,
        pid: i32,
    ) -> impl Future<Output = Result<bool, CollectError>> + Send;
}

/// Production source: a pooled tokio-postgres connection per call.
///
/// Acquire is cheap once the entry is live; a dead connection surfaces
/// here as `CollectError::Connection` and the pool's eviction hook makes
/// the next cycle start clean.
pub struct PgStatsSource {
    pool: ConnectionPool<PgConnector>,
    identity: ConnectionIdentity,
}

impl PgStatsSource {
    pub fn new(pool: ConnectionPool<PgConnector>, identity: ConnectionIdentity) -> Self {
        Self { pool, identity }
    }

    async fn client(&self) -> Result<std::sync::Arc<tokio_postgres::Client>, CollectError> {
        self.pool
            .acquire(&self.identity)
            .await
            .map_err(|e| CollectError::Connection(e.to_string()))
    }
}

impl StatsSource for PgStatsSource {
    async fn fetch_stats(&mut self) -> Result<StatsSnapshot, CollectError> {
        let client = self.client().await?;
        collector::fetch_stats(&client, self.identity.database_name()).await
    }

    async fn fetch_details(&mut self, kind: ObjectKind) -> Result<DetailTable, CollectError> {
        let client = self.client().await?;
        collector::fetch_details(&client, kind).await
    }

    async fn cancel_query(&mut self, pid: i32) -> Result<bool, CollectError> {
        let client = self.client().await?;
        collector::cancel_backend(&client, pid).await
    }

    async fn terminate_query(&mut self, pid: i32) -> Result<bool, CollectError> {
        let client = self.client().await?;
        collector::terminate_backend(&client, pid).await
    }
}

// ---------------------------------------------------------------------------
// Service loop
// ---------------------------------------------------------------------------

/// The active side of the control plane.
pub struct StatsService<S: StatsSource> {
    source: S,
    rates: RateState,
    channel: ServiceChannel,
}

impl<S: StatsSource> StatsService<S> {
    pub fn new(source: S, channel: ServiceChannel) -> Self {
        Self {
            source,
            rates: RateState::new(),
            channel,
        }
    }

    /// Consumes requests until every request sender is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.channel.requests.recv().await {
            match request {
                ControlRequest::Refresh => self.refresh().await,
                ControlRequest::ShowDetails(kind) => self.show_details(kind).await,
                ControlRequest::CancelQuery(pid) => self.signal(pid, false).await,
                ControlRequest::TerminateQuery(pid) => self.signal(pid, true).await,
            }
        }
        debug!("control channel closed; stats service stopping");
    }

    async fn refresh(&mut self) {
        match self.source.fetch_stats().await {
            Ok(snapshot) => {
                let timestamp = snapshot.captured_at;
                match self.rates.update(&snapshot) {
                    Some(rates) => {
                        self.respond(ControlResponse::StatsUpdated(Box::new(RateSample {
                            snapshot,
                            timestamp,
                            rates,
                        })));
                    }
                    None => {
                        debug!(timestamp, "discarding out-of-order snapshot");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "stats collection failed");
                self.respond(ControlResponse::CollectionFailed(e.to_string()));
            }
        }
    }

    async fn show_details(&mut self, kind: ObjectKind) {
        match self.source.fetch_details(kind).await {
            Ok(table) => self.respond(ControlResponse::DetailResult(Box::new(table))),
            Err(e) => self.respond(ControlResponse::CommandFailed {
                action: "show details",
                reason: e.to_string(),
            }),
        }
    }

    /// Cancel or terminate one backend. An acknowledged command triggers
    /// an implicit refresh so the active-query list reflects the change.
    async fn signal(&mut self, pid: i32, terminate: bool) {
        let action = if terminate {
            "terminate query"
        } else {
            "cancel query"
        };
        let outcome = if terminate {
            self.source.terminate_query(pid).await
        } else {
            self.source.cancel_query(pid).await
        };

        match outcome {
            Ok(true) => {
                debug!(pid, action, "backend signalled");
                self.refresh().await;
            }
            Ok(false) => self.respond(ControlResponse::CommandFailed {
                action,
                reason: format!("backend {} not found", pid),
            }),
            Err(e) => self.respond(ControlResponse::CommandFailed {
                action,
                reason: e.to_string(),
            }),
        }
    }

    fn respond(&self, response: ControlResponse) {
        if self.channel.responses.send(response).is_err() {
            debug!("presenter dropped the response channel");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerCounters;
    use std::collections::VecDeque;

    // -- scripted source --

    #[derive(Default)]
    struct ScriptedSource {
        snapshots: VecDeque<Result<StatsSnapshot, CollectError>>,
        acks: VecDeque<Result<bool, CollectError>>,
    }

    impl ScriptedSource {
        fn with_snapshots(
            snapshots: impl IntoIterator<Item = Result<StatsSnapshot, CollectError>>,
        ) -> Self {
            Self {
                snapshots: snapshots.into_iter().collect(),
                acks: VecDeque::new(),
            }
        }
    }

    impl StatsSource for ScriptedSource {
        async fn fetch_stats(&mut self) -> Result<StatsSnapshot, CollectError> {
            self.snapshots
                .pop_front()
                .unwrap_or_else(|| Err(CollectError::Connection("script exhausted".to_string())))
        }

        async fn fetch_details(&mut self, kind: ObjectKind) -> Result<DetailTable, CollectError> {
            Ok(DetailTable {
                kind,
                columns: vec!["schema".to_string(), "name".to_string()],
                rows: vec![vec!["public".to_string(), "events".to_string()]],
            })
        }

        async fn cancel_query(&mut self, _pid: i32) -> Result<bool, CollectError> {
            self.acks
                .pop_front()
                .unwrap_or_else(|| Err(CollectError::Query("no scripted ack".to_string())))
        }

        async fn terminate_query(&mut self, pid: i32) -> Result<bool, CollectError> {
            self.cancel_query(pid).await
        }
    }

    // -- helpers --

    fn snapshot(ts: i64, commits: i64) -> StatsSnapshot {
        StatsSnapshot {
            captured_at: ts,
            counters: ServerCounters {
                commits,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Spawns a service over the scripted source and returns the
    /// presenter-side endpoints.
    fn spawn_service(source: ScriptedSource) -> ControlChannel {
        let (channel, service_channel) = control_channel();
        tokio::spawn(StatsService::new(source, service_channel).run());
        channel
    }

    #[tokio::test]
    async fn refresh_derives_rates_across_cycles() {
        let source =
            ScriptedSource::with_snapshots([Ok(snapshot(0, 100)), Ok(snapshot(10, 110))]);
        let mut channel = spawn_service(source);

        channel.requests.send(ControlRequest::Refresh).unwrap();
        channel.requests.send(ControlRequest::Refresh).unwrap();

        let ControlResponse::StatsUpdated(first) = channel.responses.recv().await.unwrap() else {
            panic!("expected StatsUpdated");
        };
        assert_eq!(first.timestamp, 0);
        assert_eq!(first.rates.commits_s, 0.0);

        let ControlResponse::StatsUpdated(second) = channel.responses.recv().await.unwrap()
        else {
            panic!("expected StatsUpdated");
        };
        assert!((second.rates.commits_s - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn out_of_order_snapshot_is_not_delivered() {
        let source = ScriptedSource::with_snapshots([
            Ok(snapshot(10, 100)),
            Ok(snapshot(5, 90)),
            Ok(snapshot(20, 200)),
        ]);
        let mut channel = spawn_service(source);

        for _ in 0..3 {
            channel.requests.send(ControlRequest::Refresh).unwrap();
        }
        drop(channel.requests);

        let mut timestamps = Vec::new();
        while let Some(response) = channel.responses.recv().await {
            match response {
                ControlResponse::StatsUpdated(sample) => timestamps.push(sample.timestamp),
                other => panic!("unexpected response {:?}", other),
            }
        }

        // The t=5 snapshot was discarded, and the t=20 sample differenced
        // against t=10.
        assert_eq!(timestamps, vec![10, 20]);
    }

    #[tokio::test]
    async fn collection_failure_is_surfaced_and_recoverable() {
        let source = ScriptedSource::with_snapshots([
            Err(CollectError::Connection("connection refused".to_string())),
            Ok(snapshot(10, 100)),
        ]);
        let mut channel = spawn_service(source);

        channel.requests.send(ControlRequest::Refresh).unwrap();
        channel.requests.send(ControlRequest::Refresh).unwrap();

        match channel.responses.recv().await.unwrap() {
            ControlResponse::CollectionFailed(reason) => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected CollectionFailed, got {:?}", other),
        }

        assert!(matches!(
            channel.responses.recv().await.unwrap(),
            ControlResponse::StatsUpdated(_)
        ));
    }

    #[tokio::test]
    async fn acknowledged_cancel_triggers_implicit_refresh() {
        let mut source = ScriptedSource::with_snapshots([Ok(snapshot(10, 100))]);
        source.acks.push_back(Ok(true));
        let mut channel = spawn_service(source);

        channel
            .requests
            .send(ControlRequest::CancelQuery(42))
            .unwrap();

        // No CommandFailed: the only response is the refreshed sample.
        assert!(matches!(
            channel.responses.recv().await.unwrap(),
            ControlResponse::StatsUpdated(_)
        ));
    }

    #[tokio::test]
    async fn unacknowledged_terminate_surfaces_failure() {
        let mut source = ScriptedSource::default();
        source.acks.push_back(Ok(false));
        let mut channel = spawn_service(source);

        channel
            .requests
            .send(ControlRequest::TerminateQuery(42))
            .unwrap();

        match channel.responses.recv().await.unwrap() {
            ControlResponse::CommandFailed { action, reason } => {
                assert_eq!(action, "terminate query");
                assert!(reason.contains("42"));
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn show_details_returns_listing() {
        let source = ScriptedSource::default();
        let mut channel = spawn_service(source);

        channel
            .requests
            .send(ControlRequest::ShowDetails(ObjectKind::Tables))
            .unwrap();

        match channel.responses.recv().await.unwrap() {
            ControlResponse::DetailResult(table) => {
                assert_eq!(table.kind, ObjectKind::Tables);
                assert_eq!(table.rows.len(), 1);
            }
            other => panic!("expected DetailResult, got {:?}", other),
        }
    }
}
