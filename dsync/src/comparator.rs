//! Series-level comparison of a remote archive against the local archive
//!
//! For each remote study the series lists of both archives are fetched and
//! every remote series the local archive holds fewer images of becomes a
//! [`TransferCandidate`]. A series missing locally counts as 0 local images.

use crate::models::{StudyRecord, TransferCandidate};
use crate::services::InventoryQuery;
use dsync_common::DicomNode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Comparator {
    query: Arc<dyn InventoryQuery>,
}

impl Comparator {
    pub fn new(query: Arc<dyn InventoryQuery>) -> Self {
        Self { query }
    }

    /// Find incomplete series across `studies`.
    ///
    /// Populates each study's `series` list from the remote query. A failed
    /// series query (on either side) skips that study only.
    pub async fn find_incomplete(
        &self,
        remote: &DicomNode,
        local: &DicomNode,
        studies: &mut [StudyRecord],
    ) -> Vec<TransferCandidate> {
        let mut candidates = Vec::new();
        let total = studies.len();
        info!(studies = total, "Analyzing series");

        for (index, study) in studies.iter_mut().enumerate() {
            debug!(
                study_uid = %study.study_uid,
                patient = %study.patient_name,
                date = %study.date,
                "[{}/{}] Checking series",
                index + 1,
                total
            );

            let remote_series = match self.query.query_series(remote, &study.study_uid).await {
                Ok(series) => series,
                Err(e) => {
                    warn!(study_uid = %study.study_uid, error = %e, "Remote series query failed, skipping study");
                    continue;
                }
            };
            study.series = remote_series;
            if study.series.is_empty() {
                continue;
            }

            let local_counts: HashMap<String, i64> =
                match self.query.query_series(local, &study.study_uid).await {
                    Ok(series) => series
                        .into_iter()
                        .map(|s| (s.series_uid, s.image_count))
                        .collect(),
                    Err(e) => {
                        warn!(study_uid = %study.study_uid, error = %e, "Local series query failed, skipping study");
                        continue;
                    }
                };

            for series in &study.series {
                if series.image_count <= 0 {
                    debug!(series_uid = %series.series_uid, "Empty series (skip)");
                    continue;
                }
                let local_count = local_counts.get(&series.series_uid).copied().unwrap_or(0);
                if local_count >= series.image_count {
                    debug!(
                        series_uid = %series.series_uid,
                        images = series.image_count,
                        "Series complete (skip)"
                    );
                    continue;
                }
                debug!(
                    series_uid = %series.series_uid,
                    number = %series.number,
                    remote = series.image_count,
                    local = local_count,
                    "Series incomplete"
                );
                candidates.push(TransferCandidate {
                    study: study.clone(),
                    series: series.clone(),
                    local_image_count: local_count,
                });
            }
        }

        info!(incomplete = candidates.len(), "Comparison complete");
        candidates
    }
}
