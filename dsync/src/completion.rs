//! Post-transfer confirmation by polling the local inventory
//!
//! A C-MOVE reporting success does not mean every image has landed. The
//! monitor polls the destination until the expected count is reached, the
//! count settles, or the deadline passes.

use crate::models::CompletionVerdict;
use crate::services::InventoryQuery;
use dsync_common::config::SyncSettings;
use dsync_common::time::Clock;
use dsync_common::DicomNode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polling bounds; the stagnation window is a heuristic, not a protocol rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Identical consecutive readings after which the count is settled
    pub stagnant_polls: u32,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            stagnant_polls: 3,
        }
    }
}

impl From<&SyncSettings> for CompletionPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            timeout: settings.completion_timeout(),
            poll_interval: settings.completion_poll_interval(),
            stagnant_polls: settings.completion_stagnant_polls.max(1),
        }
    }
}

pub struct CompletionMonitor {
    query: Arc<dyn InventoryQuery>,
    clock: Arc<dyn Clock>,
    stagnant_polls: u32,
}

impl CompletionMonitor {
    pub fn new(query: Arc<dyn InventoryQuery>, clock: Arc<dyn Clock>, stagnant_polls: u32) -> Self {
        Self {
            query,
            clock,
            stagnant_polls: stagnant_polls.max(1),
        }
    }

    /// Current image count of one series on `node`; absent series read as 0.
    /// `None` when the query itself failed.
    async fn poll_count(&self, node: &DicomNode, study_uid: &str, series_uid: &str) -> Option<i64> {
        match self.query.query_series(node, study_uid).await {
            Ok(series) => Some(
                series
                    .iter()
                    .find(|s| s.series_uid == series_uid)
                    .map(|s| s.image_count)
                    .unwrap_or(0),
            ),
            Err(e) => {
                warn!(study_uid, series_uid, error = %e, "Completion poll failed");
                None
            }
        }
    }

    /// Wait for `expected_image_count` images of the series to appear on `node`.
    ///
    /// Failed polls count as no reading; only the deadline bounds them.
    pub async fn wait(
        &self,
        node: &DicomNode,
        study_uid: &str,
        series_uid: &str,
        expected_image_count: i64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> CompletionVerdict {
        let started = self.clock.now();
        let mut last: Option<i64> = None;
        let mut identical_reads = 0u32;

        loop {
            if let Some(count) = self.poll_count(node, study_uid, series_uid).await {
                debug!(series_uid, observed = count, expected = expected_image_count, "Completion poll");

                if count >= expected_image_count {
                    info!(series_uid, observed = count, "Transfer confirmed complete");
                    return CompletionVerdict::Complete { observed: count };
                }

                if last == Some(count) {
                    identical_reads += 1;
                } else {
                    last = Some(count);
                    identical_reads = 1;
                }

                if identical_reads >= self.stagnant_polls {
                    if count > 0 {
                        warn!(
                            series_uid,
                            observed = count,
                            expected = expected_image_count,
                            "Image count settled below expected, accepting partial transfer"
                        );
                        return CompletionVerdict::Partial { observed: count };
                    }
                    warn!(series_uid, "No images arrived, transfer did not start");
                    return CompletionVerdict::NotStarted;
                }
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= timeout {
                let observed = last.unwrap_or(0);
                warn!(
                    series_uid,
                    observed,
                    expected = expected_image_count,
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for transfer to land"
                );
                return CompletionVerdict::TimedOut { observed };
            }

            self.clock.sleep(poll_interval).await;
        }
    }
}
