//! dsync library interface
//!
//! Remote-to-local DICOM archive reconciliation: find series that are
//! incomplete locally, wait for them to settle on the remote, and pull them
//! across with C-MOVE.

pub mod comparator;
pub mod completion;
pub mod executor;
pub mod models;
pub mod netaddr;
pub mod scheduler;
pub mod selection;
pub mod services;
pub mod stability;
pub mod statistics;

pub use crate::comparator::Comparator;
pub use crate::completion::{CompletionMonitor, CompletionPolicy};
pub use crate::executor::{ExecutorSettings, TransferExecutor, TransferRoute};
pub use crate::models::{
    CompletionVerdict, SeriesRecord, StudyRecord, TransferCandidate, TransferOutcome,
};
pub use crate::scheduler::{CycleReport, CycleScheduler, SchedulerSettings, SchedulerState, SyncNodes, SyncScope};
pub use crate::selection::SelectionMode;
pub use crate::stability::{StabilityKey, StabilityRecord, StabilityTracker};
pub use crate::statistics::TransferStatistics;
