//! In-memory archive answering inventory queries for every node it holds

use super::fixtures::TODAY;
use async_trait::async_trait;
use dsync::models::{SeriesRecord, StudyRecord};
use dsync::services::{InventoryQuery, ServiceError};
use dsync_common::DicomNode;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
struct SeriesEntry {
    record: SeriesRecord,
    images: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct StudyEntry {
    record: StudyRecord,
    series: BTreeMap<String, SeriesEntry>,
}

type SeriesKey = (String, String, String);

#[derive(Default)]
struct State {
    /// AE title → study UID → study
    nodes: HashMap<String, BTreeMap<String, StudyEntry>>,
    failing_study_queries: HashSet<String>,
    failing_series_queries: HashSet<(String, String)>,
    failing_image_queries: HashSet<String>,
    /// Counts reported on successive series queries (last one sticks)
    scripted_counts: HashMap<SeriesKey, VecDeque<i64>>,
    study_queries: usize,
    cancel_on_study_query: Option<(usize, CancellationToken)>,
}

/// Shared handle; clones see the same inventories
#[derive(Clone, Default)]
pub struct FakeArchive {
    state: Arc<Mutex<State>>,
}

pub fn image_id(series_uid: &str, index: i64) -> String {
    format!("{}.{}", series_uid, index)
}

fn association_failure(ae: &str) -> ServiceError {
    ServiceError::Association {
        node: ae.to_string(),
        reason: "association rejected".to_string(),
    }
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add (or re-date) a study on `ae`
    pub fn add_study(&self, ae: &str, study_uid: &str, date: &str, time: &str) {
        let mut state = self.lock();
        let study = state
            .nodes
            .entry(ae.to_string())
            .or_default()
            .entry(study_uid.to_string())
            .or_default();
        study.record.study_uid = study_uid.to_string();
        study.record.date = date.to_string();
        study.record.time = time.to_string();
        study.record.patient_name = format!("PATIENT^{}", study_uid);
        study.record.patient_id = format!("PID-{}", study_uid);
    }

    /// Set a series to hold images 1..=count
    pub fn set_series(&self, ae: &str, study_uid: &str, series_uid: &str, count: i64) {
        let mut state = self.lock();
        let study = state
            .nodes
            .entry(ae.to_string())
            .or_default()
            .entry(study_uid.to_string())
            .or_default();
        if study.record.study_uid.is_empty() {
            study.record.study_uid = study_uid.to_string();
            study.record.date = TODAY.to_string();
            study.record.time = "110000".to_string();
        }
        let entry = study.series.entry(series_uid.to_string()).or_default();
        entry.record = SeriesRecord {
            series_uid: series_uid.to_string(),
            number: "1".to_string(),
            image_count: count,
            modality: "CT".to_string(),
            description: format!("Series {}", series_uid),
        };
        entry.images = (1..=count).map(|i| image_id(series_uid, i)).collect();
    }

    pub fn image_count(&self, ae: &str, study_uid: &str, series_uid: &str) -> i64 {
        self.lock()
            .nodes
            .get(ae)
            .and_then(|studies| studies.get(study_uid))
            .and_then(|study| study.series.get(series_uid))
            .map(|series| series.images.len() as i64)
            .unwrap_or(0)
    }

    /// Copy images of one series from `from` to `to`.
    ///
    /// `only` restricts the copy to a single image; `limit` caps how many
    /// new images arrive. Returns the number copied.
    pub fn copy_images(
        &self,
        from: &str,
        to: &str,
        study_uid: &str,
        series_uid: &str,
        only: Option<&str>,
        limit: Option<usize>,
    ) -> usize {
        let mut state = self.lock();
        let Some(source_study) = state
            .nodes
            .get(from)
            .and_then(|studies| studies.get(study_uid))
            .cloned()
        else {
            return 0;
        };
        let Some(source_series) = source_study.series.get(series_uid).cloned() else {
            return 0;
        };

        let target_study = state
            .nodes
            .entry(to.to_string())
            .or_default()
            .entry(study_uid.to_string())
            .or_insert_with(|| StudyEntry {
                record: source_study.record.clone(),
                series: BTreeMap::new(),
            });
        let target = target_study
            .series
            .entry(series_uid.to_string())
            .or_insert_with(|| SeriesEntry {
                record: source_series.record.clone(),
                images: Vec::new(),
            });

        let mut copied = 0;
        for id in &source_series.images {
            if limit.map(|max| copied >= max).unwrap_or(false) {
                break;
            }
            if only.map(|wanted| wanted != id).unwrap_or(false) {
                continue;
            }
            if !target.images.contains(id) {
                target.images.push(id.clone());
                copied += 1;
            }
        }
        target.record.image_count = target.images.len() as i64;
        copied
    }

    pub fn fail_study_queries(&self, ae: &str) {
        self.lock().failing_study_queries.insert(ae.to_string());
    }

    pub fn fail_series_queries(&self, ae: &str, study_uid: &str) {
        self.lock()
            .failing_series_queries
            .insert((ae.to_string(), study_uid.to_string()));
    }

    pub fn restore_series_queries(&self, ae: &str, study_uid: &str) {
        self.lock()
            .failing_series_queries
            .remove(&(ae.to_string(), study_uid.to_string()));
    }

    pub fn fail_image_queries(&self, ae: &str) {
        self.lock().failing_image_queries.insert(ae.to_string());
    }

    /// Report these counts on successive series queries of one series
    pub fn script_counts(&self, ae: &str, study_uid: &str, series_uid: &str, counts: Vec<i64>) {
        self.lock().scripted_counts.insert(
            (ae.to_string(), study_uid.to_string(), series_uid.to_string()),
            counts.into(),
        );
    }

    /// Cancel `token` when the `nth` study query (1-based) arrives
    pub fn cancel_on_study_query(&self, nth: usize, token: CancellationToken) {
        self.lock().cancel_on_study_query = Some((nth, token));
    }

    pub fn study_queries(&self) -> usize {
        self.lock().study_queries
    }
}

#[async_trait]
impl InventoryQuery for FakeArchive {
    async fn query_studies(
        &self,
        node: &DicomNode,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<StudyRecord>, ServiceError> {
        let mut state = self.lock();
        state.study_queries += 1;
        if let Some((nth, token)) = &state.cancel_on_study_query {
            if state.study_queries >= *nth {
                token.cancel();
            }
        }
        if state.failing_study_queries.contains(&node.ae_title) {
            return Err(association_failure(&node.ae_title));
        }

        let studies = state
            .nodes
            .get(&node.ae_title)
            .map(|studies| {
                studies
                    .values()
                    .filter(|s| s.record.date.as_str() >= date_from && s.record.date.as_str() <= date_to)
                    .map(|s| {
                        let mut record = s.record.clone();
                        record.total_image_count =
                            s.series.values().map(|series| series.images.len() as i64).sum();
                        record
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(studies)
    }

    async fn query_series(
        &self,
        node: &DicomNode,
        study_uid: &str,
    ) -> Result<Vec<SeriesRecord>, ServiceError> {
        let mut state = self.lock();
        if state
            .failing_series_queries
            .contains(&(node.ae_title.clone(), study_uid.to_string()))
        {
            return Err(association_failure(&node.ae_title));
        }

        let mut scripted: HashMap<String, i64> = HashMap::new();
        for ((ae, study, series), counts) in state.scripted_counts.iter_mut() {
            if ae == &node.ae_title && study == study_uid {
                let count = if counts.len() > 1 {
                    counts.pop_front()
                } else {
                    counts.front().copied()
                };
                if let Some(count) = count {
                    scripted.insert(series.clone(), count);
                }
            }
        }

        let mut series: Vec<SeriesRecord> = state
            .nodes
            .get(&node.ae_title)
            .and_then(|studies| studies.get(study_uid))
            .map(|study| {
                study
                    .series
                    .values()
                    .map(|entry| {
                        let mut record = entry.record.clone();
                        record.image_count = entry.images.len() as i64;
                        record
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (series_uid, count) in scripted {
            match series.iter_mut().find(|s| s.series_uid == series_uid) {
                Some(record) => record.image_count = count,
                None => series.push(SeriesRecord::new(series_uid, count)),
            }
        }
        Ok(series)
    }

    async fn query_image_ids(
        &self,
        node: &DicomNode,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let state = self.lock();
        if state.failing_image_queries.contains(&node.ae_title) {
            return Err(association_failure(&node.ae_title));
        }
        Ok(state
            .nodes
            .get(&node.ae_title)
            .and_then(|studies| studies.get(study_uid))
            .and_then(|study| study.series.get(series_uid))
            .map(|series| series.images.clone())
            .unwrap_or_default())
    }
}
