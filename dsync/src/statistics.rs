//! Transfer statistics for one executed batch
//!
//! Rates are images per second of wall time as measured by the engine clock.

use crate::models::TransferOutcome;
use serde::Serialize;

/// Aggregate of one batch of transfers
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStatistics {
    /// Candidates in the queue
    pub total_series: usize,
    /// Sum of remote image counts across the queue
    pub total_images: i64,
    pub transferred_series: usize,
    pub failed_series: usize,
    pub images_transferred: i64,
    pub image_level_transfers: usize,
    pub elapsed_seconds: f64,
    /// Queue was abandoned because of cancellation
    pub cancelled: bool,
    #[serde(skip)]
    pub outcomes: Vec<TransferOutcome>,
}

impl TransferStatistics {
    pub fn new(total_series: usize, total_images: i64) -> Self {
        Self {
            total_series,
            total_images,
            ..Default::default()
        }
    }

    /// Record one candidate's outcome
    pub fn record(&mut self, outcome: TransferOutcome) {
        if outcome.succeeded {
            self.transferred_series += 1;
            self.images_transferred += outcome.images_moved;
        } else {
            self.failed_series += 1;
        }
        if outcome.used_image_level_strategy {
            self.image_level_transfers += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Images per second over `elapsed_seconds`
    pub fn average_rate(&self) -> f64 {
        rate(self.images_transferred, self.elapsed_seconds)
    }

    /// Running average at an intermediate point of the batch
    pub fn running_rate(&self, elapsed_seconds: f64) -> f64 {
        rate(self.images_transferred, elapsed_seconds)
    }

    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Successfully transferred: {}/{} series ({} images)",
            self.transferred_series, self.total_series, self.images_transferred
        )];
        if self.failed_series > 0 {
            lines.push(format!("Failed: {} series", self.failed_series));
        }
        if self.image_level_transfers > 0 {
            lines.push(format!("Image-level transfers: {}", self.image_level_transfers));
        }
        lines.push(format!(
            "Total time: {:.1} seconds ({:.1} minutes)",
            self.elapsed_seconds,
            self.elapsed_seconds / 60.0
        ));
        lines.push(format!(
            "Average transfer rate: {:.1} images/second ({:.1} images/minute)",
            self.average_rate(),
            self.average_rate() * 60.0
        ));
        lines
    }
}

fn rate(images: i64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        images as f64 / seconds
    } else {
        0.0
    }
}
