//! Sequential transfer execution
//!
//! Exactly one transfer request is in flight at a time: the source archive
//! is assumed to serve a single association. Each candidate is fully
//! resolved (request, then completion wait) before the next one starts, and
//! one candidate's failure never stops the batch.

use crate::completion::{CompletionMonitor, CompletionPolicy};
use crate::models::{CompletionVerdict, TransferCandidate, TransferOutcome};
use crate::services::{InventoryQuery, NetworkTransfer};
use crate::statistics::TransferStatistics;
use chrono::{DateTime, Utc};
use dsync_common::time::Clock;
use dsync_common::{Destination, DicomNode};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Strategy knobs for the executor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    /// Allow per-image transfers for mostly-present series
    pub image_level: bool,
    /// Locally-present fraction above which per-image transfer is used
    pub image_level_threshold: f64,
    pub completion: CompletionPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            image_level: false,
            image_level_threshold: 0.7,
            completion: CompletionPolicy::default(),
        }
    }
}

/// Where transfers go from and to
#[derive(Debug, Clone)]
pub struct TransferRoute<'a> {
    pub source: &'a DicomNode,
    pub local: &'a DicomNode,
    pub destination: &'a Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Series,
    Image,
}

pub struct TransferExecutor {
    query: Arc<dyn InventoryQuery>,
    transfer: Arc<dyn NetworkTransfer>,
    clock: Arc<dyn Clock>,
    monitor: CompletionMonitor,
    settings: ExecutorSettings,
}

impl TransferExecutor {
    pub fn new(
        query: Arc<dyn InventoryQuery>,
        transfer: Arc<dyn NetworkTransfer>,
        clock: Arc<dyn Clock>,
        settings: ExecutorSettings,
    ) -> Self {
        let monitor = CompletionMonitor::new(
            query.clone(),
            clock.clone(),
            settings.completion.stagnant_polls,
        );
        Self {
            query,
            transfer,
            clock,
            monitor,
            settings,
        }
    }

    fn strategy_for(&self, candidate: &TransferCandidate) -> Strategy {
        if self.settings.image_level
            && candidate.local_fraction() > self.settings.image_level_threshold
        {
            Strategy::Image
        } else {
            Strategy::Series
        }
    }

    fn seconds_since(&self, start: DateTime<Utc>) -> f64 {
        (self.clock.now() - start).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Run the queue in order. Cancellation is honoured between candidates.
    pub async fn execute(
        &self,
        route: &TransferRoute<'_>,
        queue: Vec<TransferCandidate>,
        cancel: &CancellationToken,
    ) -> TransferStatistics {
        let total_images: i64 = queue.iter().map(|c| c.remote_image_count()).sum();
        let mut stats = TransferStatistics::new(queue.len(), total_images);
        if queue.is_empty() {
            info!("No series to transfer");
            return stats;
        }

        info!(series = queue.len(), images = total_images, "Starting transfer");
        let batch_start = self.clock.now();
        let total = queue.len();

        for (index, candidate) in queue.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = total - index, "Cancelled, abandoning transfer queue");
                stats.cancelled = true;
                break;
            }

            let description: String = candidate.series.description.chars().take(60).collect();
            info!(
                patient = %candidate.study.patient_name,
                date = %candidate.study.display_date(),
                series = %candidate.series.number,
                modality = %candidate.series.modality,
                status = %candidate.status_label(),
                description = %description,
                "[{}/{}] C-MOVE START",
                index + 1,
                total
            );

            let outcome = self.transfer_one(route, candidate).await;
            let succeeded = outcome.succeeded;
            let images = outcome.images_moved;
            let series_rate = outcome.throughput();
            let seconds = outcome.duration_seconds;
            stats.record(outcome);

            if succeeded {
                let average = stats.running_rate(self.seconds_since(batch_start));
                info!(
                    images,
                    "C-MOVE COMPLETE: {:.1} img/s (this series) | Average: {:.1} img/s | Time: {:.1}s",
                    series_rate,
                    average,
                    seconds
                );
            } else {
                warn!("C-MOVE FAILED after {:.1}s", seconds);
            }
        }

        stats.elapsed_seconds = self.seconds_since(batch_start);
        for line in stats.display_lines() {
            info!("{}", line);
        }
        stats
    }

    async fn transfer_one(&self, route: &TransferRoute<'_>, candidate: TransferCandidate) -> TransferOutcome {
        let start = self.clock.now();
        let strategy = self.strategy_for(&candidate);

        let (requested, used_image_level) = match strategy {
            Strategy::Image => match self.move_missing_images(route, &candidate).await {
                Some(ok) => (ok, true),
                // Image lists unavailable; fall back to the whole series
                None => (self.move_series(route, &candidate).await, false),
            },
            Strategy::Series => (self.move_series(route, &candidate).await, false),
        };

        let verdict = if requested {
            let policy = self.settings.completion;
            Some(
                self.monitor
                    .wait(
                        route.local,
                        &candidate.study.study_uid,
                        &candidate.series.series_uid,
                        candidate.remote_image_count(),
                        policy.timeout,
                        policy.poll_interval,
                    )
                    .await,
            )
        } else {
            None
        };

        let succeeded = verdict.map(|v| v.is_delivered()).unwrap_or(false);
        let images_moved = match verdict {
            Some(v) if succeeded => (v.observed() - candidate.local_image_count).max(0),
            _ => 0,
        };

        TransferOutcome {
            candidate,
            succeeded,
            images_moved,
            duration_seconds: self.seconds_since(start),
            used_image_level_strategy: used_image_level,
            verdict,
        }
    }

    async fn move_series(&self, route: &TransferRoute<'_>, candidate: &TransferCandidate) -> bool {
        self.transfer
            .move_series(
                route.source,
                route.destination,
                &candidate.study.study_uid,
                &candidate.series.series_uid,
            )
            .await
    }

    /// Request only the images absent locally.
    ///
    /// Returns `None` when the image lists cannot be obtained or show
    /// nothing missing, so the caller falls back to a series-level move.
    /// Partial success counts as success.
    async fn move_missing_images(
        &self,
        route: &TransferRoute<'_>,
        candidate: &TransferCandidate,
    ) -> Option<bool> {
        let study_uid = &candidate.study.study_uid;
        let series_uid = &candidate.series.series_uid;

        let remote_ids = match self.query.query_image_ids(route.source, study_uid, series_uid).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(series_uid = %series_uid, error = %e, "Remote image list unavailable");
                return None;
            }
        };
        let local_ids: HashSet<String> =
            match self.query.query_image_ids(route.local, study_uid, series_uid).await {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(series_uid = %series_uid, error = %e, "Local image list unavailable");
                    return None;
                }
            };

        let missing: Vec<&String> = remote_ids.iter().filter(|id| !local_ids.contains(*id)).collect();
        if missing.is_empty() {
            warn!(series_uid = %series_uid, "Image lists show nothing missing");
            return None;
        }

        info!(
            series_uid = %series_uid,
            missing = missing.len(),
            present = local_ids.len(),
            "Image-level transfer"
        );

        let mut moved = 0usize;
        for image_id in &missing {
            if self
                .transfer
                .move_image(route.source, route.destination, study_uid, series_uid, image_id)
                .await
            {
                moved += 1;
            }
        }

        if moved < missing.len() {
            warn!(
                series_uid = %series_uid,
                moved,
                requested = missing.len(),
                "Image-level transfer partially succeeded ({}/{})",
                moved,
                missing.len()
            );
        }
        Some(moved > 0)
    }
}
