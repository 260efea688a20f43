//! Concurrent conversion of many documents
//!
//! Each document is converted on tokio's blocking pool; documents share
//! nothing but the options and the cancellation token. Results come back
//! in the order the jobs were given, whatever order they finish in.

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::compose::{CancellationToken, Conversion, ConvertOptions, DocumentComposer};
use crate::error::{DarkPdfError, Result};

/// One document to convert
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Caller-chosen label, usually the input path
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Outcome of one job
#[derive(Debug)]
pub struct BatchResult {
    pub name: String,
    pub result: Result<Conversion>,
}

/// Convert every job concurrently and return results in job order
pub async fn convert_all(
    jobs: Vec<BatchJob>,
    options: ConvertOptions,
    cancel: CancellationToken,
) -> Vec<BatchResult> {
    let count = jobs.len();
    let mut names = Vec::with_capacity(count);
    let mut set = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        names.push(job.name);
        let composer = DocumentComposer::new(options).with_cancellation(cancel.clone());
        let bytes = job.bytes;
        set.spawn_blocking(move || (index, composer.convert_bytes(&bytes)));
    }

    let mut slots: Vec<Option<Result<Conversion>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                debug!(job = index, ok = result.is_ok(), "conversion finished");
                slots[index] = Some(result);
            }
            Err(join_error) => warn!(error = %join_error, "conversion task failed"),
        }
    }

    names
        .into_iter()
        .zip(slots)
        .map(|(name, slot)| BatchResult {
            result: slot.unwrap_or_else(|| {
                Err(DarkPdfError::Task(format!("conversion of {} did not complete", name)))
            }),
            name,
        })
        .collect()
}
