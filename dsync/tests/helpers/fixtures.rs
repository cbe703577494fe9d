//! Nodes, clock and builders shared by the integration tests

use super::FakeArchive;
use chrono::{TimeZone, Utc};
use dsync::models::{SeriesRecord, StudyRecord, TransferCandidate};
use dsync_common::time::ManualClock;
use dsync_common::DicomNode;

pub const REMOTE_AE: &str = "REMOTE";
pub const LOCAL_AE: &str = "LOCAL";

/// Date the test clock starts on (12:00)
pub const TODAY: &str = "20240105";

pub fn remote_node() -> DicomNode {
    DicomNode::new("Remote PACS", REMOTE_AE, "10.0.0.9", 104)
}

pub fn local_node() -> DicomNode {
    DicomNode::new("Local PACS", LOCAL_AE, "10.0.0.5", 11112)
}

pub fn test_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap())
}

/// Seed one series with `remote` images on the remote and `local` on the local node
pub fn seed_series(archive: &FakeArchive, study_uid: &str, series_uid: &str, remote: i64, local: i64) {
    archive.set_series(REMOTE_AE, study_uid, series_uid, remote);
    if local > 0 {
        archive.set_series(LOCAL_AE, study_uid, series_uid, local);
    }
}

pub fn candidate(study_uid: &str, series_uid: &str, remote: i64, local: i64) -> TransferCandidate {
    let mut study = StudyRecord::new(study_uid);
    study.date = TODAY.to_string();
    study.time = "110000".to_string();
    TransferCandidate {
        study,
        series: SeriesRecord::new(series_uid, remote),
        local_image_count: local,
    }
}
