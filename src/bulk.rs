//! Bounded worker pool for batch and playlist downloads.
//!
//! Up to [`BULK_WORKERS`] extractor invocations run at once. Results come back
//! in request order; failures become `None` and are not aggregated.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::downloader::{DownloadOutcome, DownloadRequest, Downloader};

pub const BULK_WORKERS: usize = 3;

#[derive(Debug, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<Option<DownloadOutcome>>,
    pub succeeded: usize,
}

impl BulkReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

pub async fn download_many(downloader: &Downloader, requests: Vec<DownloadRequest>) -> BulkReport {
    let total = requests.len();
    let semaphore = Arc::new(Semaphore::new(BULK_WORKERS));
    let mut tasks = JoinSet::new();

    for (index, request) in requests.into_iter().enumerate() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let downloader = downloader.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome = match downloader.download(&request) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!(url = %request.url, "bulk item failed: {err}");
                    None
                }
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<DownloadOutcome>> = vec![None; total];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = outcome,
            Err(err) => warn!("bulk worker panicked: {err}"),
        }
    }

    let succeeded = outcomes.iter().filter(|outcome| outcome.is_some()).count();
    info!(succeeded, total, "bulk download finished");
    BulkReport {
        outcomes,
        succeeded,
    }
}
