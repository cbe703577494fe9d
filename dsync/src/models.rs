//! Inventory records and transfer bookkeeping types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Study-level inventory record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub study_uid: String,
    pub date: String,
    pub time: String,
    pub patient_id: String,
    pub patient_name: String,
    pub description: String,
    pub total_image_count: i64,
    /// Filled in by the comparator from the per-study series query
    #[serde(default)]
    pub series: Vec<SeriesRecord>,
}

impl StudyRecord {
    pub fn new(study_uid: impl Into<String>) -> Self {
        Self {
            study_uid: study_uid.into(),
            ..Default::default()
        }
    }

    /// StudyDate as YYYY-MM-DD when it is well formed
    pub fn display_date(&self) -> String {
        if self.date.len() == 8 && self.date.is_ascii() {
            format!("{}-{}-{}", &self.date[..4], &self.date[4..6], &self.date[6..8])
        } else {
            self.date.clone()
        }
    }
}

impl fmt::Display for StudyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Study({}, {}, {})", self.study_uid, self.date, self.patient_id)
    }
}

/// Series-level inventory record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_uid: String,
    pub number: String,
    pub image_count: i64,
    pub modality: String,
    pub description: String,
}

impl SeriesRecord {
    pub fn new(series_uid: impl Into<String>, image_count: i64) -> Self {
        Self {
            series_uid: series_uid.into(),
            image_count,
            ..Default::default()
        }
    }
}

/// A series the local archive holds fewer images of than the remote
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCandidate {
    pub study: StudyRecord,
    pub series: SeriesRecord,
    /// Local image count when the candidate was produced
    pub local_image_count: i64,
}

impl TransferCandidate {
    pub fn remote_image_count(&self) -> i64 {
        self.series.image_count
    }

    pub fn missing_images(&self) -> i64 {
        (self.series.image_count - self.local_image_count).max(0)
    }

    /// Fraction of the series already present locally, in [0, 1]
    pub fn local_fraction(&self) -> f64 {
        if self.series.image_count <= 0 {
            return 0.0;
        }
        (self.local_image_count as f64 / self.series.image_count as f64).clamp(0.0, 1.0)
    }

    pub fn status_label(&self) -> String {
        if self.local_image_count == 0 {
            format!("New series ({} img)", self.series.image_count)
        } else {
            format!(
                "Incomplete ({}/{} img)",
                self.local_image_count, self.series.image_count
            )
        }
    }
}

/// How the completion monitor judged a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionVerdict {
    /// Local count reached the expected count
    Complete { observed: i64 },
    /// Count settled above zero but below the expected count
    Partial { observed: i64 },
    /// Count stayed at zero; the copy never started
    NotStarted,
    /// Deadline passed while the count was still moving
    TimedOut { observed: i64 },
}

impl CompletionVerdict {
    pub fn observed(&self) -> i64 {
        match self {
            CompletionVerdict::Complete { observed }
            | CompletionVerdict::Partial { observed }
            | CompletionVerdict::TimedOut { observed } => *observed,
            CompletionVerdict::NotStarted => 0,
        }
    }

    /// Whether the transfer counts as delivered (possibly with a warning)
    pub fn is_delivered(&self) -> bool {
        !matches!(self, CompletionVerdict::NotStarted)
    }
}

/// Statistics record for one executed candidate; not persisted
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub candidate: TransferCandidate,
    pub succeeded: bool,
    pub images_moved: i64,
    pub duration_seconds: f64,
    pub used_image_level_strategy: bool,
    /// None when the transfer request itself failed
    pub verdict: Option<CompletionVerdict>,
}

impl TransferOutcome {
    /// Images per second for this candidate
    pub fn throughput(&self) -> f64 {
        if self.duration_seconds > 0.0 {
            self.images_moved as f64 / self.duration_seconds
        } else {
            0.0
        }
    }
}
