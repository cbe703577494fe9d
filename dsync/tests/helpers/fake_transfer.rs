//! C-MOVE stand-in: copies images between FakeArchive nodes by AE title

use super::FakeArchive;
use async_trait::async_trait;
use dsync::services::NetworkTransfer;
use dsync_common::{Destination, DicomNode};
use std::collections::HashSet;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TransferState {
    series_moves: Vec<String>,
    image_moves: Vec<String>,
    destinations: Vec<Destination>,
    rejected_series: HashSet<String>,
    rejected_images: HashSet<String>,
    deliver_at_most: Option<usize>,
    cancel_after_moves: Option<(usize, CancellationToken)>,
}

pub struct FakeTransfer {
    archive: FakeArchive,
    state: Mutex<TransferState>,
}

impl FakeTransfer {
    pub fn new(archive: FakeArchive) -> Self {
        Self {
            archive,
            state: Mutex::new(TransferState::default()),
        }
    }

    /// Report failure for moves of this series
    pub fn reject_series(&self, series_uid: &str) {
        self.state.lock().unwrap().rejected_series.insert(series_uid.to_string());
    }

    pub fn reject_image(&self, image_id: &str) {
        self.state.lock().unwrap().rejected_images.insert(image_id.to_string());
    }

    /// Report success but deliver at most `count` images per series move
    pub fn deliver_at_most(&self, count: usize) {
        self.state.lock().unwrap().deliver_at_most = Some(count);
    }

    /// Cancel `token` once `moves` series moves have been requested
    pub fn cancel_after_moves(&self, moves: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_moves = Some((moves, token));
    }

    pub fn series_moves(&self) -> Vec<String> {
        self.state.lock().unwrap().series_moves.clone()
    }

    pub fn image_moves(&self) -> Vec<String> {
        self.state.lock().unwrap().image_moves.clone()
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.state.lock().unwrap().destinations.clone()
    }
}

#[async_trait]
impl NetworkTransfer for FakeTransfer {
    async fn move_series(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
    ) -> bool {
        let (rejected, limit) = {
            let mut state = self.state.lock().unwrap();
            state.series_moves.push(series_uid.to_string());
            state.destinations.push(destination.clone());
            if let Some((moves, token)) = &state.cancel_after_moves {
                if state.series_moves.len() >= *moves {
                    token.cancel();
                }
            }
            (state.rejected_series.contains(series_uid), state.deliver_at_most)
        };
        if rejected {
            return false;
        }
        self.archive.copy_images(
            &source.ae_title,
            &destination.ae_title,
            study_uid,
            series_uid,
            None,
            limit,
        );
        true
    }

    async fn move_image(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
        image_id: &str,
    ) -> bool {
        let rejected = {
            let mut state = self.state.lock().unwrap();
            state.image_moves.push(image_id.to_string());
            state.rejected_images.contains(image_id)
        };
        if rejected {
            return false;
        }
        self.archive.copy_images(
            &source.ae_title,
            &destination.ae_title,
            study_uid,
            series_uid,
            Some(image_id),
            None,
        ) > 0
    }
}
