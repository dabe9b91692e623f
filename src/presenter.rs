//! Presenter state for the dashboard.
//!
//! The presenter is the passive side of the control plane: it fires
//! requests on a timer or user action and folds responses into its view
//! state and rolling history. It never blocks waiting for a response;
//! every answer arrives as an independently delivered message and is
//! applied idempotently, so a stale update for a superseded refresh is
//! still safe.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::control::{ControlRequest, ControlResponse, RequestSender};
use crate::history::HistoryBuffer;
use crate::models::{DetailTable, ObjectKind};
use crate::rates::RateSample;

// ---------------------------------------------------------------------------
// Refresh cadence
// ---------------------------------------------------------------------------

/// Auto-refresh cadence. `Off` disables the timer; manual refresh stays
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
    Off,
    Secs(u64),
}

impl RefreshInterval {
    /// The cadences offered by the dashboard.
    pub const PRESETS: [RefreshInterval; 5] = [
        RefreshInterval::Off,
        RefreshInterval::Secs(5),
        RefreshInterval::Secs(10),
        RefreshInterval::Secs(30),
        RefreshInterval::Secs(60),
    ];

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            RefreshInterval::Off => None,
            RefreshInterval::Secs(secs) => Some(Duration::from_secs(*secs)),
        }
    }

    /// Returns the next preset, cycling back to `Off` after the longest.
    /// A non-preset value restarts the cycle.
    pub fn next(&self) -> RefreshInterval {
        let position = Self::PRESETS.iter().position(|p| p == self);
        match position {
            Some(i) => Self::PRESETS[(i + 1) % Self::PRESETS.len()],
            None => Self::PRESETS[0],
        }
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        RefreshInterval::Secs(10)
    }
}

impl std::fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshInterval::Off => f.write_str("off"),
            RefreshInterval::Secs(secs) => write!(f, "{}s", secs),
        }
    }
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// The dashboard view-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    /// Initial state until the first sample arrives.
    #[default]
    Loading,
    /// Showing data; a refresh may be dispatched.
    Ready,
    /// A refresh is outstanding; no new one is dispatched.
    Refreshing,
    /// Drill-down sub-view for one object kind.
    Detail(ObjectKind),
}

// ---------------------------------------------------------------------------
// Presenter
// ---------------------------------------------------------------------------

/// Passive consumer of the control plane.
///
/// Single-threaded by construction: the hosting loop feeds responses in
/// arrival order through [`Presenter::handle_response`], so partial view
/// updates never interleave.
pub struct Presenter {
    requests: RequestSender,
    state: ViewState,
    history: HistoryBuffer,
    interval: RefreshInterval,
    last_refresh_sent: Option<Instant>,
    last_error: Option<String>,
    detail: Option<DetailTable>,
}

impl Presenter {
    pub fn new(requests: RequestSender) -> Self {
        Self {
            requests,
            state: ViewState::Loading,
            history: HistoryBuffer::default(),
            interval: RefreshInterval::default(),
            last_refresh_sent: None,
            last_error: None,
            detail: None,
        }
    }

    // -- accessors --

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn latest(&self) -> Option<&RateSample> {
        self.history.latest()
    }

    /// One-line description of the last failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn interval(&self) -> RefreshInterval {
        self.interval
    }

    pub fn set_interval(&mut self, interval: RefreshInterval) {
        self.interval = interval;
    }

    /// Steps to the next cadence preset.
    pub fn cycle_interval(&mut self) {
        self.interval = self.interval.next();
    }

    /// The drill-down listing, once it has arrived.
    pub fn detail(&self) -> Option<&DetailTable> {
        self.detail.as_ref()
    }

    // -- requests --

    /// Dispatches the initial refresh. The view stays `Loading` until the
    /// first sample arrives.
    pub fn start(&mut self, now: Instant) {
        self.send(ControlRequest::Refresh);
        self.last_refresh_sent = Some(now);
    }

    /// Timer hook, called at the host's driver cadence. Dispatches a
    /// refresh when the configured interval has elapsed and the view is
    /// `Ready` (never while one is outstanding).
    pub fn tick(&mut self, now: Instant) {
        if self.state != ViewState::Ready {
            return;
        }
        let Some(every) = self.interval.as_duration() else {
            return;
        };
        let due = match self.last_refresh_sent {
            Some(sent) => now.duration_since(sent) >= every,
            None => true,
        };
        if due {
            self.send_refresh(now);
        }
    }

    /// Explicit user refresh. Ignored while one is already outstanding.
    pub fn refresh(&mut self, now: Instant) {
        if self.state == ViewState::Ready {
            self.send_refresh(now);
        }
    }

    /// Requests the drill-down listing for one object kind and enters the
    /// sub-view.
    pub fn show_details(&mut self, kind: ObjectKind) {
        if self.state != ViewState::Ready {
            return;
        }
        self.send(ControlRequest::ShowDetails(kind));
        self.state = ViewState::Detail(kind);
        self.detail = None;
    }

    /// Leaves the drill-down sub-view.
    pub fn back(&mut self) {
        if let ViewState::Detail(_) = self.state {
            self.state = ViewState::Ready;
            self.detail = None;
        }
    }

    /// Fire-and-forget soft cancel. The service refreshes implicitly once
    /// the database acknowledges.
    pub fn cancel_query(&mut self, pid: i32) {
        self.send(ControlRequest::CancelQuery(pid));
    }

    /// Fire-and-forget hard terminate.
    pub fn terminate_query(&mut self, pid: i32) {
        self.send(ControlRequest::TerminateQuery(pid));
    }

    fn send_refresh(&mut self, now: Instant) {
        self.send(ControlRequest::Refresh);
        self.state = ViewState::Refreshing;
        self.last_refresh_sent = Some(now);
    }

    fn send(&self, request: ControlRequest) {
        if self.requests.send(request).is_err() {
            debug!("stats service is gone; request dropped");
        }
    }

    // -- responses --

    /// Folds one response into the view state.
    pub fn handle_response(&mut self, response: ControlResponse) {
        match response {
            ControlResponse::StatsUpdated(sample) => {
                // Idempotent overwrite; the rate engine already enforced
                // time ordering, so even a stale sample appends safely.
                self.last_error = None;
                self.history.push(*sample);
                match self.state {
                    ViewState::Loading | ViewState::Refreshing => {
                        self.state = ViewState::Ready;
                    }
                    ViewState::Ready | ViewState::Detail(_) => {}
                }
            }
            ControlResponse::DetailResult(table) => match self.state {
                ViewState::Detail(kind) if kind == table.kind => {
                    self.detail = Some(*table);
                }
                _ => {
                    debug!(kind = %table.kind, "dropping superseded drill-down listing");
                }
            },
            ControlResponse::CollectionFailed(reason) => {
                self.last_error = Some(reason);
                // History stays intact; return to Ready so the user (or
                // the timer) can retry.
                if matches!(self.state, ViewState::Loading | ViewState::Refreshing) {
                    self.state = ViewState::Ready;
                }
            }
            ControlResponse::CommandFailed { action, reason } => {
                self.last_error = Some(format!("{} failed: {}", action, reason));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ServiceChannel, control_channel};
    use crate::models::{ServerCounters, StatsSnapshot};
    use crate::rates::CounterRates;

    fn presenter() -> (Presenter, ServiceChannel) {
        let (channel, service) = control_channel();
        (Presenter::new(channel.requests), service)
    }

    fn sample(ts: i64) -> ControlResponse {
        ControlResponse::StatsUpdated(Box::new(RateSample {
            snapshot: StatsSnapshot {
                captured_at: ts,
                counters: ServerCounters::default(),
                ..Default::default()
            },
            timestamp: ts,
            rates: CounterRates::default(),
        }))
    }

    fn next_request(service: &mut ServiceChannel) -> Option<ControlRequest> {
        service.requests.try_recv().ok()
    }

    #[test]
    fn initial_load_reaches_ready() {
        let (mut p, mut service) = presenter();
        let now = Instant::now();

        p.start(now);
        assert_eq!(next_request(&mut service), Some(ControlRequest::Refresh));
        assert_eq!(p.state(), ViewState::Loading);

        p.handle_response(sample(100));
        assert_eq!(p.state(), ViewState::Ready);
        assert_eq!(p.history().len(), 1);
        assert_eq!(p.latest().unwrap().timestamp, 100);
    }

    #[test]
    fn tick_fires_only_when_due_and_ready() {
        let (mut p, mut service) = presenter();
        p.set_interval(RefreshInterval::Secs(5));
        let t0 = Instant::now();

        p.start(t0);
        next_request(&mut service);
        p.handle_response(sample(100));

        // Not yet due.
        p.tick(t0 + Duration::from_secs(4));
        assert_eq!(next_request(&mut service), None);

        // Due: a refresh goes out and the view turns busy.
        p.tick(t0 + Duration::from_secs(6));
        assert_eq!(next_request(&mut service), Some(ControlRequest::Refresh));
        assert_eq!(p.state(), ViewState::Refreshing);

        // Busy: no overlapping refresh, no matter how late it is.
        p.tick(t0 + Duration::from_secs(60));
        assert_eq!(next_request(&mut service), None);
    }

    #[test]
    fn off_interval_disables_timer_but_not_manual_refresh() {
        let (mut p, mut service) = presenter();
        p.set_interval(RefreshInterval::Off);
        let t0 = Instant::now();

        p.start(t0);
        next_request(&mut service);
        p.handle_response(sample(100));

        p.tick(t0 + Duration::from_secs(3600));
        assert_eq!(next_request(&mut service), None);

        p.refresh(t0 + Duration::from_secs(3600));
        assert_eq!(next_request(&mut service), Some(ControlRequest::Refresh));
    }

    #[test]
    fn stale_stats_update_is_still_applied() {
        let (mut p, mut service) = presenter();
        p.start(Instant::now());
        next_request(&mut service);
        p.handle_response(sample(100));
        assert_eq!(p.state(), ViewState::Ready);

        // A late answer to a superseded refresh: snapshots are idempotent
        // overwrites, so it lands in the history.
        p.handle_response(sample(110));
        assert_eq!(p.state(), ViewState::Ready);
        assert_eq!(p.history().len(), 2);
    }

    #[test]
    fn drill_down_round_trip() {
        let (mut p, mut service) = presenter();
        p.start(Instant::now());
        next_request(&mut service);
        p.handle_response(sample(100));

        p.show_details(ObjectKind::Tables);
        assert_eq!(
            next_request(&mut service),
            Some(ControlRequest::ShowDetails(ObjectKind::Tables))
        );
        assert_eq!(p.state(), ViewState::Detail(ObjectKind::Tables));
        assert!(p.detail().is_none());

        // A listing for another kind was superseded; dropped.
        p.handle_response(ControlResponse::DetailResult(Box::new(DetailTable {
            kind: ObjectKind::Views,
            columns: Vec::new(),
            rows: Vec::new(),
        })));
        assert!(p.detail().is_none());

        p.handle_response(ControlResponse::DetailResult(Box::new(DetailTable {
            kind: ObjectKind::Tables,
            columns: vec!["schema".to_string()],
            rows: vec![vec!["public".to_string()]],
        })));
        assert_eq!(p.detail().unwrap().rows.len(), 1);

        // Stats keep flowing into history while drilled down.
        p.handle_response(sample(110));
        assert_eq!(p.state(), ViewState::Detail(ObjectKind::Tables));
        assert_eq!(p.history().len(), 2);

        p.back();
        assert_eq!(p.state(), ViewState::Ready);
        assert!(p.detail().is_none());
    }

    #[test]
    fn collection_failure_sets_toast_and_keeps_history() {
        let (mut p, mut service) = presenter();
        let t0 = Instant::now();
        p.start(t0);
        next_request(&mut service);
        p.handle_response(sample(100));

        p.refresh(t0);
        next_request(&mut service);
        p.handle_response(ControlResponse::CollectionFailed(
            "connection refused".to_string(),
        ));

        assert_eq!(p.last_error(), Some("connection refused"));
        assert_eq!(p.history().len(), 1);
        assert_eq!(p.state(), ViewState::Ready);

        // The next good sample clears the toast.
        p.refresh(t0);
        p.handle_response(sample(110));
        assert_eq!(p.last_error(), None);
    }

    #[test]
    fn command_failure_is_reported_without_state_change() {
        let (mut p, mut service) = presenter();
        p.start(Instant::now());
        next_request(&mut service);
        p.handle_response(sample(100));

        p.cancel_query(42);
        assert_eq!(
            next_request(&mut service),
            Some(ControlRequest::CancelQuery(42))
        );
        assert_eq!(p.state(), ViewState::Ready);

        p.handle_response(ControlResponse::CommandFailed {
            action: "cancel query",
            reason: "backend 42 not found".to_string(),
        });
        assert!(p.last_error().unwrap().contains("cancel query"));
        assert_eq!(p.state(), ViewState::Ready);
    }

    #[test]
    fn interval_presets_cycle() {
        let mut interval = RefreshInterval::Off;
        let mut seen = Vec::new();
        for _ in 0..RefreshInterval::PRESETS.len() {
            interval = interval.next();
            seen.push(interval);
        }
        assert_eq!(*seen.last().unwrap(), RefreshInterval::Off);
        assert!(seen.contains(&RefreshInterval::Secs(10)));
    }
}
