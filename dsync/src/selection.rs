//! Selection policy: which stable incomplete series to transfer now
//!
//! Series missing a single image are held back in every mode except an
//! explicitly bounded one: single-image C-MOVEs fail far more often than
//! multi-image ones.
//!
//! Output preserves input order (per study, for smallest-only), so the
//! result is deterministic for a given input.

use crate::models::TransferCandidate;
use std::collections::HashMap;
use std::fmt;

/// Minimum missing images for a candidate to be worth a transfer
pub const MIN_MISSING_IMAGES: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Per study, only the incomplete series with the fewest remote images
    #[default]
    SmallestOnly,
    /// Series with at most `max_images` remote images. `explicit` is set
    /// when the bound came from the caller rather than configuration, and
    /// lifts the single-missing-image suppression.
    Bounded { max_images: i64, explicit: bool },
    /// Every incomplete series
    All,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::SmallestOnly => f.write_str("smallest series per study"),
            SelectionMode::Bounded { max_images, .. } => {
                write!(f, "series with <= {} images", max_images)
            }
            SelectionMode::All => f.write_str("all incomplete series"),
        }
    }
}

impl SelectionMode {
    fn suppresses_single_missing(&self) -> bool {
        !matches!(self, SelectionMode::Bounded { explicit: true, .. })
    }

    fn admits(&self, candidate: &TransferCandidate) -> bool {
        if self.suppresses_single_missing() && candidate.missing_images() < MIN_MISSING_IMAGES {
            return false;
        }
        match self {
            SelectionMode::Bounded { max_images, .. } => candidate.remote_image_count() <= *max_images,
            SelectionMode::SmallestOnly | SelectionMode::All => true,
        }
    }
}

/// Turn stable incomplete candidates into the ordered transfer queue
pub fn select(candidates: Vec<TransferCandidate>, mode: SelectionMode) -> Vec<TransferCandidate> {
    let admitted = candidates.into_iter().filter(|c| {
        let keep = mode.admits(c);
        if !keep {
            tracing::debug!(
                series_uid = %c.series.series_uid,
                remote = c.remote_image_count(),
                local = c.local_image_count,
                mode = %mode,
                "Not selected"
            );
        }
        keep
    });

    match mode {
        SelectionMode::SmallestOnly => smallest_per_study(admitted),
        SelectionMode::Bounded { .. } | SelectionMode::All => admitted.collect(),
    }
}

fn smallest_per_study(candidates: impl Iterator<Item = TransferCandidate>) -> Vec<TransferCandidate> {
    let mut chosen: Vec<TransferCandidate> = Vec::new();
    let mut slot_by_study: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        match slot_by_study.get(&candidate.study.study_uid) {
            Some(&slot) => {
                // Strictly smaller wins; ties keep the first seen
                if candidate.remote_image_count() < chosen[slot].remote_image_count() {
                    chosen[slot] = candidate;
                }
            }
            None => {
                slot_by_study.insert(candidate.study.study_uid.clone(), chosen.len());
                chosen.push(candidate);
            }
        }
    }
    chosen
}
