//! External collaborators: inventory queries and network transfers
//!
//! The engine only sees the two traits below. Calls are issued one at a time
//! by the engine; implementations need not support concurrent use of a
//! single association.

pub mod dcmtk;

use crate::models::{SeriesRecord, StudyRecord};
use async_trait::async_trait;
use dsync_common::{Destination, DicomNode};
use thiserror::Error;

pub use dcmtk::DcmtkClient;

/// Failure of a single query round trip
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Remote unreachable or association rejected
    #[error("Association failed with {node}: {reason}")]
    Association { node: String, reason: String },

    /// Round trip exceeded its time bound
    #[error("Request to {node} timed out after {seconds}s")]
    Timeout { node: String, seconds: u64 },

    /// Response could not be interpreted
    #[error("Malformed response from {node}: {reason}")]
    Malformed { node: String, reason: String },

    /// Local tool could not be started
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// Hierarchical inventory queries (study → series → image)
#[async_trait]
pub trait InventoryQuery: Send + Sync {
    /// Studies whose StudyDate lies in `[date_from, date_to]` (YYYYMMDD)
    async fn query_studies(
        &self,
        node: &DicomNode,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<StudyRecord>, ServiceError>;

    async fn query_series(
        &self,
        node: &DicomNode,
        study_uid: &str,
    ) -> Result<Vec<SeriesRecord>, ServiceError>;

    /// SOP Instance UIDs of one series
    async fn query_image_ids(
        &self,
        node: &DicomNode,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<Vec<String>, ServiceError>;
}

/// Copy requests from a source node to a destination.
///
/// Only success/failure is reported; partial delivery is observed separately
/// by polling the destination inventory.
#[async_trait]
pub trait NetworkTransfer: Send + Sync {
    async fn move_series(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
    ) -> bool;

    async fn move_image(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
        image_id: &str,
    ) -> bool;
}
