//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race a call against a deadline
//! - Keep timeout errors distinct from call errors
//!
//! # Design Decisions
//! - Uses Tokio's timer, so paused-time tests never sleep for real
//! - A timed-out future is dropped, not aborted: work it already handed to
//!   another task keeps running and its result is discarded

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The deadline fired before the call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {}ms exceeded", .0.as_millis())]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` with a deadline.
pub async fn with_deadline<F>(deadline: Duration, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DeadlineExceeded(deadline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_before_slow_call() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        };
        let err = with_deadline(Duration::from_secs(1), slow).await.unwrap_err();
        assert_eq!(err, DeadlineExceeded(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let value = with_deadline(Duration::from_secs(1), async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
