//! Bounded best-effort batches.
//!
//! Cascade sub-requests (per-item category rewrites) run as a concurrent
//! batch with a typed per-item outcome: everything settles, individual
//! failures are collected rather than propagated, and the caller decides
//! what the failures mean. Nothing in here aborts on first error.

use std::future::Future;
use std::num::NonZeroUsize;

use futures::{StreamExt, stream};
use tracing::warn;
use uuid::Uuid;

use super::remote::RemoteError;

/// One sub-request that did not land.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: Uuid,
    pub error: RemoteError,
}

/// How a batch went, item by item.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every task, at most `concurrency` at a time, and settle them all.
///
/// Failures are logged and collected; they never cancel the rest of the
/// batch.
pub async fn settle_all<Fut>(concurrency: NonZeroUsize, tasks: Vec<(Uuid, Fut)>) -> BatchOutcome
where
    Fut: Future<Output = Result<(), RemoteError>>,
{
    let attempted = tasks.len();
    let failures: Vec<BatchFailure> = stream::iter(
        tasks
            .into_iter()
            .map(|(id, task)| async move { (id, task.await) }),
    )
    .buffer_unordered(concurrency.get())
    .filter_map(|(id, result)| async move {
        match result {
            Ok(()) => None,
            Err(error) => {
                warn!(item_id = %id, error = %error, "Cascade sub-request failed");
                Some(BatchFailure { id, error })
            }
        }
    })
    .collect()
    .await;

    BatchOutcome {
        attempted,
        failures,
    }
}
