//! Transactional batched primitives over the wide table.
//!
//! [`KvAdapter`] is the only path the repository uses to reach storage. It
//! owns the concerns the table client should not leak to callers:
//!
//! - bounded exponential backoff on throttling (after the retry budget,
//!   `Throttled` surfaces unchanged);
//! - a per-call deadline carved from the request deadline minus a small
//!   overhead budget (`Timeout` is never retried);
//! - cancellation at every suspension point;
//! - transparent pagination — callers see a fully drained, ordered result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::{Error, Result};

use super::{
    DeleteOutcome, OpContext, PutOutcome, Row, TransactWriteOutcome, WideTable, WriteOp,
    MAX_TRANSACT_ITEMS,
};

/// Retry schedule for throttled store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// The key–value adapter: five primitives, one atomic step or a typed
/// outcome each.
pub struct KvAdapter<T> {
    table: Arc<T>,
    retry: RetryPolicy,
    call_overhead: Duration,
    page_limit: usize,
}

impl<T: WideTable> KvAdapter<T> {
    /// Wrap a table client with the default retry schedule and a 250ms
    /// per-call overhead reserve.
    pub fn new(table: Arc<T>) -> Self {
        Self {
            table,
            retry: RetryPolicy::default(),
            call_overhead: Duration::from_millis(250),
            page_limit: 100,
        }
    }

    /// Override the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-call overhead reserve.
    #[must_use]
    pub fn with_call_overhead(mut self, overhead: Duration) -> Self {
        self.call_overhead = overhead;
        self
    }

    /// Override the page size used when draining queries.
    #[must_use]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// Strongly consistent single-row read.
    pub async fn get_item(
        &self,
        ctx: &OpContext,
        entity_name: &str,
        subject_name: &str,
    ) -> Result<Option<Row>> {
        self.run(ctx, "get_item", || {
            self.table.get_item(entity_name, subject_name)
        })
        .await
    }

    /// Conditional insert; an existing key reports `AlreadyPresent`.
    pub async fn put_item_if_absent(&self, ctx: &OpContext, row: Row) -> Result<PutOutcome> {
        self.run(ctx, "put_item_if_absent", || {
            self.table.put_item_if_absent(row.clone())
        })
        .await
    }

    /// Delete by key; absence reports `Absent`, never an error.
    pub async fn delete_item(
        &self,
        ctx: &OpContext,
        entity_name: &str,
        subject_name: &str,
    ) -> Result<DeleteOutcome> {
        self.run(ctx, "delete_item", || {
            self.table.delete_item(entity_name, subject_name)
        })
        .await
    }

    /// Drain every row of a partition, optionally bounded to a subject
    /// prefix, ascending by `subjectName`. Pagination is re-issued here
    /// until exhaustion.
    pub async fn query_by_entity(
        &self,
        ctx: &OpContext,
        entity_name: &str,
        subject_prefix: Option<&str>,
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut start_after: Option<String> = None;
        loop {
            let page = self
                .run(ctx, "query_by_entity", || {
                    self.table.query_page(
                        entity_name,
                        subject_prefix,
                        start_after.as_deref(),
                        self.page_limit,
                    )
                })
                .await?;
            rows.extend(page.rows);
            match page.last_key {
                Some((_, subject)) => start_after = Some(subject),
                None => return Ok(rows),
            }
        }
    }

    /// Drain the whole table, ascending by key.
    pub async fn scan(&self, ctx: &OpContext) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut start_after: Option<(String, String)> = None;
        loop {
            let page = self
                .run(ctx, "scan", || {
                    self.table.scan_page(start_after.as_ref(), self.page_limit)
                })
                .await?;
            rows.extend(page.rows);
            match page.last_key {
                Some(key) => start_after = Some(key),
                None => return Ok(rows),
            }
        }
    }

    /// One atomic transaction of up to [`MAX_TRANSACT_ITEMS`] writes.
    pub async fn transact_write(
        &self,
        ctx: &OpContext,
        ops: Vec<WriteOp>,
    ) -> Result<TransactWriteOutcome> {
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(Error::internal(format!(
                "transaction of {} items exceeds the {MAX_TRANSACT_ITEMS}-item limit",
                ops.len()
            )));
        }
        self.run(ctx, "transact_write", || {
            self.table.transact_write(ops.clone())
        })
        .await
    }

    /// Startup reachability probe. Failure maps to exit code 2 in the host
    /// runner.
    pub async fn probe(&self, ctx: &OpContext) -> Result<()> {
        self.run(ctx, "probe", || self.table.probe()).await
    }

    /// Execute one raw call with cancellation, per-attempt deadline and
    /// throttle retries.
    async fn run<R, F, Fut>(&self, ctx: &OpContext, op: &'static str, mut call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let overhead = self.call_overhead;
        let attempt = || {
            let fut = call();
            async move {
                match ctx.call_budget(overhead)? {
                    Some(budget) => tokio::time::timeout(budget, fut)
                        .await
                        .map_err(|_| Error::Timeout)?,
                    None => fut.await,
                }
            }
        };

        let retried = attempt
            .retry(self.retry.backoff())
            .when(Error::is_throttle)
            .notify(|err: &Error, delay: Duration| {
                debug!(
                    operation = op,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying throttled store call"
                );
            });

        tokio::select! {
            () = ctx.cancellation().cancelled() => Err(Error::Cancelled),
            result = retried => result,
        }
    }
}
