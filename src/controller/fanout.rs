//! Bounded fan-out/fan-in of independent updates.
//!
//! Units run concurrently, at most `limit` at a time, and are all awaited
//! before [`fan_out`] returns. Failures are logged individually and reported
//! as a single [`Error::Aggregate`] so callers never act on a partially
//! applied batch.

use std::future::Future;

use futures::{StreamExt, stream};
use tracing::{debug, error};

use crate::controller::error::{Error, Result};

/// Run every unit with at most `limit` in flight and join them all.
pub async fn fan_out<I, F>(operation: &str, limit: usize, units: I) -> Result<()>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>>,
{
    let outcomes: Vec<Result<()>> = stream::iter(units)
        .buffer_unordered(limit.max(1))
        .collect()
        .await;

    let total = outcomes.len();
    let mut failed = 0;
    for outcome in outcomes {
        if let Err(e) = outcome {
            error!(operation = %operation, error = %e, "Concurrent update failed");
            failed += 1;
        }
    }
    debug!(operation = %operation, total, failed, "Fan-out complete");

    if failed > 0 {
        return Err(Error::Aggregate {
            operation: operation.to_string(),
            failed,
            total,
        });
    }
    Ok(())
}
