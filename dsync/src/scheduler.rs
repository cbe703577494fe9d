//! Reconciliation cycle driver
//!
//! # State Progression
//! Idle → RunningCycle → (Waiting → RunningCycle)* → Stopped
//!
//! Each cycle: resolve scope → query remote studies → compare → stability
//! gate → select → execute → persist stability state → choose delay.
//! A cycle that moved at least `busy_threshold_images` images is followed
//! by a short pause; otherwise by the idle delay.
//!
//! One-shot day runs skip stability gating and scheduling entirely.

use crate::comparator::Comparator;
use crate::executor::{TransferExecutor, TransferRoute};
use crate::models::{StudyRecord, TransferCandidate};
use crate::selection::{self, SelectionMode};
use crate::services::InventoryQuery;
use crate::stability::{StabilityKey, StabilityTracker};
use crate::statistics::TransferStatistics;
use chrono::{NaiveDate, NaiveDateTime};
use dsync_common::config::SyncSettings;
use dsync_common::time::{self as dtime, Clock};
use dsync_common::{Destination, DicomNode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Which studies a cycle looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// Studies acquired within the last N hours
    RollingHours(u32),
    /// Every study of one calendar day
    Day(NaiveDate),
}

impl SyncScope {
    /// StudyDate range (YYYYMMDD, inclusive) to query for
    pub fn date_range(&self, now: NaiveDateTime) -> (String, String) {
        match self {
            SyncScope::RollingHours(hours) => {
                let from = dtime::hours_before(now, *hours).date();
                (dtime::format_dicom_date(from), dtime::format_dicom_date(now.date()))
            }
            SyncScope::Day(day) => {
                let day = dtime::format_dicom_date(*day);
                (day.clone(), day)
            }
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncScope::RollingHours(hours) => write!(f, "last {} hours", hours),
            SyncScope::Day(day) => write!(f, "day {}", dtime::format_dicom_date(*day)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    Waiting,
    Stopped,
}

/// Cycle pacing and housekeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub busy_threshold_images: i64,
    pub busy_pause: Duration,
    pub idle_delay: Duration,
    pub cleanup_every_cycles: u64,
    pub retention_hours: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SchedulerSettings {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            busy_threshold_images: i64::try_from(settings.busy_threshold_images).unwrap_or(i64::MAX),
            busy_pause: settings.busy_pause(),
            idle_delay: settings.idle_delay(),
            cleanup_every_cycles: settings.cleanup_every_cycles.max(1),
            retention_hours: settings.retention_hours,
        }
    }
}

/// The nodes one scheduler works between
#[derive(Debug, Clone)]
pub struct SyncNodes {
    /// Short name of the remote; scopes stability keys
    pub remote_name: String,
    pub remote: DicomNode,
    pub local: DicomNode,
}

impl SyncNodes {
    pub fn destination(&self) -> Destination {
        self.remote.move_destination(&self.local)
    }
}

/// What one cycle saw and did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub scope: SyncScope,
    pub studies_found: usize,
    pub incomplete_series: usize,
    pub stable_series: usize,
    pub selected_series: usize,
    pub statistics: TransferStatistics,
}

impl CycleReport {
    fn empty(cycle: u64, scope: SyncScope) -> Self {
        Self {
            cycle,
            scope,
            studies_found: 0,
            incomplete_series: 0,
            stable_series: 0,
            selected_series: 0,
            statistics: TransferStatistics::default(),
        }
    }

    pub fn images_transferred(&self) -> i64 {
        self.statistics.images_transferred
    }
}

fn stability_key(remote_name: &str, candidate: &TransferCandidate) -> StabilityKey {
    StabilityKey::new(
        remote_name,
        candidate.study.study_uid.as_str(),
        candidate.series.series_uid.as_str(),
    )
}

pub struct CycleScheduler {
    query: Arc<dyn InventoryQuery>,
    comparator: Comparator,
    tracker: StabilityTracker,
    executor: TransferExecutor,
    clock: Arc<dyn Clock>,
    nodes: SyncNodes,
    mode: SelectionMode,
    settings: SchedulerSettings,
    state: SchedulerState,
    cycles: u64,
}

impl CycleScheduler {
    pub fn new(
        query: Arc<dyn InventoryQuery>,
        executor: TransferExecutor,
        tracker: StabilityTracker,
        clock: Arc<dyn Clock>,
        nodes: SyncNodes,
        mode: SelectionMode,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            comparator: Comparator::new(query.clone()),
            query,
            tracker,
            executor,
            clock,
            nodes,
            mode,
            settings,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    /// Delay before the next cycle given how much the last one moved
    pub fn next_delay(&self, images_transferred: i64) -> Duration {
        if images_transferred >= self.settings.busy_threshold_images {
            self.settings.busy_pause
        } else {
            self.settings.idle_delay
        }
    }

    async fn remote_studies(&self, scope: SyncScope) -> Option<Vec<StudyRecord>> {
        let now = self.clock.local_now();
        let (date_from, date_to) = scope.date_range(now);
        info!(scope = %scope, date_from = %date_from, date_to = %date_to, "Searching for studies");

        let studies = match self
            .query
            .query_studies(&self.nodes.remote, &date_from, &date_to)
            .await
        {
            Ok(studies) => studies,
            Err(e) => {
                // Retried implicitly by the next cycle
                error!(node = %self.nodes.remote.name, error = %e, "Remote study query failed");
                return None;
            }
        };

        let total = studies.len();
        let studies: Vec<StudyRecord> = match scope {
            SyncScope::RollingHours(hours) => studies
                .into_iter()
                .filter(|s| dtime::is_within_last_hours(&s.date, &s.time, now, hours))
                .collect(),
            SyncScope::Day(_) => studies,
        };
        info!(found = total, in_scope = studies.len(), "Remote studies");
        Some(studies)
    }

    /// Run one reconciliation pass.
    ///
    /// With `gate_on_stability`, only series whose remote count was seen
    /// unchanged on the previous cycle are eligible, and delivered series
    /// are cleared from the tracker.
    pub async fn run_cycle(
        &mut self,
        scope: SyncScope,
        gate_on_stability: bool,
        cancel: &CancellationToken,
    ) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let mut report = CycleReport::empty(cycle, scope);
        info!(cycle, started = %self.clock.local_now().format("%Y-%m-%d %H:%M:%S"), "Starting sync cycle");

        let Some(mut studies) = self.remote_studies(scope).await else {
            return report;
        };
        report.studies_found = studies.len();
        if studies.is_empty() {
            info!(cycle, scope = %scope, "No remote studies in scope");
            return report;
        }

        let incomplete = self
            .comparator
            .find_incomplete(&self.nodes.remote, &self.nodes.local, &mut studies)
            .await;
        report.incomplete_series = incomplete.len();

        let eligible: Vec<TransferCandidate> = if gate_on_stability {
            let remote_name = self.nodes.remote_name.as_str();
            let tracker = &mut self.tracker;
            incomplete
                .into_iter()
                .filter(|candidate| {
                    let key = stability_key(remote_name, candidate);
                    let stable = tracker.observe(&key, candidate.remote_image_count());
                    if !stable {
                        info!(
                            series_uid = %candidate.series.series_uid,
                            images = candidate.remote_image_count(),
                            "Series not yet stable, deferring"
                        );
                    }
                    stable
                })
                .collect()
        } else {
            incomplete
        };
        report.stable_series = eligible.len();

        let queue = selection::select(eligible, self.mode);
        report.selected_series = queue.len();
        info!(
            cycle,
            incomplete = report.incomplete_series,
            eligible = report.stable_series,
            selected = report.selected_series,
            mode = %self.mode,
            "Selection complete"
        );

        let destination = self.nodes.destination();
        info!(destination = %destination, "C-MOVE destination");
        let route = TransferRoute {
            source: &self.nodes.remote,
            local: &self.nodes.local,
            destination: &destination,
        };
        report.statistics = self.executor.execute(&route, queue, cancel).await;

        if gate_on_stability {
            for outcome in report.statistics.outcomes.iter().filter(|o| o.succeeded) {
                let key = stability_key(&self.nodes.remote_name, &outcome.candidate);
                self.tracker.mark_transferred(&key);
            }
        }

        info!(
            cycle,
            images = report.images_transferred(),
            "Sync cycle completed"
        );
        report
    }

    fn persist(&mut self) {
        if let Err(e) = self.tracker.save() {
            error!(error = %e, "Failed to save stability state");
        }
    }

    /// Run cycles over a rolling window until `cancel` fires.
    ///
    /// Stability state is loaded once, saved after every cycle and again on
    /// the way out. Returns the number of cycles run.
    pub async fn run_continuous(&mut self, lookback_hours: u32, cancel: CancellationToken) -> u64 {
        if let Err(e) = self.tracker.load() {
            warn!(error = %e, "Could not load stability state, starting cold");
        }
        let scope = SyncScope::RollingHours(lookback_hours);
        let first_cycle = self.cycles;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.state = SchedulerState::RunningCycle;
            if (self.cycles - first_cycle) % self.settings.cleanup_every_cycles.max(1) == 0 {
                self.tracker.cleanup(self.settings.retention_hours);
            }

            let report = self.run_cycle(scope, true, &cancel).await;
            self.persist();

            if cancel.is_cancelled() {
                break;
            }

            let delay = self.next_delay(report.images_transferred());
            if delay == self.settings.busy_pause {
                info!(images = report.images_transferred(), "Starting next cycle after short pause");
            } else {
                info!(seconds = delay.as_secs(), "Waiting before next sync cycle");
            }

            self.state = SchedulerState::Waiting;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(delay) => {}
            }
        }

        self.persist();
        self.state = SchedulerState::Stopped;
        let cycles = self.cycles - first_cycle;
        info!(cycles, "Synchronization stopped");
        cycles
    }

    /// Single pass over one calendar day, without stability gating
    pub async fn run_single_day(&mut self, day: NaiveDate, cancel: &CancellationToken) -> CycleReport {
        self.state = SchedulerState::RunningCycle;
        let report = self.run_cycle(SyncScope::Day(day), false, cancel).await;
        self.state = SchedulerState::Stopped;
        report
    }
}
