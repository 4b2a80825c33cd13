//! Key–value store layer.
//!
//! Everything the service persists lives in one wide-column table whose
//! composite primary key is `(entityName, subjectName)`. This module owns
//! the row model and the [`WideTable`] contract a concrete table client
//! implements; [`adapter::KvAdapter`] layers retries, deadlines,
//! cancellation and transparent pagination on top.
//!
//! # Design
//!
//! [`WideTable`] is deliberately narrow (five primitives plus a startup
//! probe) so it can be swapped with an in-memory fake in every test. A
//! transaction that fails a condition is a *normal outcome* — it comes back
//! as [`TransactWriteOutcome::Cancelled`] with per-item reasons, not as an
//! error — because the repository translates condition failures into its
//! own not-found variants.

pub mod adapter;
pub mod memory;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

pub use adapter::KvAdapter;
pub use memory::InMemoryTable;

/// Maximum number of items a single `TransactWrite` may carry.
///
/// Matches the floor the store contract guarantees; larger mutations are
/// split into independent chunks of at most this size.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// A single row of the wide table. Rows carry no payload beyond their
/// composite key; every fact the service stores is encoded in the key pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Row {
    /// Partition key
    pub entity_name: String,
    /// Sort key
    pub subject_name: String,
}

impl Row {
    /// Construct a row from its key pair.
    pub fn new(entity_name: impl Into<String>, subject_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            subject_name: subject_name.into(),
        }
    }
}

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The row was written
    Inserted,
    /// An identical key was already present; nothing was written
    AlreadyPresent,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The row existed and was removed
    Deleted,
    /// No such row; nothing was removed
    Absent,
}

/// Condition attached to a transactional write item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The keyed row must exist at the transaction point
    Exists,
    /// The keyed row must not exist at the transaction point
    Absent,
}

/// One item of a `TransactWrite`.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Write a row, optionally conditioned on its own current state
    Put {
        /// Row to write
        row: Row,
        /// Optional condition on the row's key
        condition: Option<Condition>,
    },
    /// Delete a row by key, optionally conditioned
    Delete {
        /// Partition key
        entity_name: String,
        /// Sort key
        subject_name: String,
        /// Optional condition on the row's key
        condition: Option<Condition>,
    },
    /// Assert a condition on a row without writing it
    Check {
        /// Partition key
        entity_name: String,
        /// Sort key
        subject_name: String,
        /// Condition that must hold for the transaction to commit
        condition: Condition,
    },
}

impl WriteOp {
    /// A `Put` conditioned on the key being absent.
    #[must_use]
    pub fn put_if_absent(row: Row) -> Self {
        Self::Put {
            row,
            condition: Some(Condition::Absent),
        }
    }

    /// An unconditional delete.
    pub fn delete(entity_name: impl Into<String>, subject_name: impl Into<String>) -> Self {
        Self::Delete {
            entity_name: entity_name.into(),
            subject_name: subject_name.into(),
            condition: None,
        }
    }

    /// A condition check that the keyed row exists.
    pub fn check_exists(entity_name: impl Into<String>, subject_name: impl Into<String>) -> Self {
        Self::Check {
            entity_name: entity_name.into(),
            subject_name: subject_name.into(),
            condition: Condition::Exists,
        }
    }
}

/// Per-item reason inside a cancelled transaction, index-aligned with the
/// submitted ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCancelReason {
    /// This item did not cause the cancellation
    None,
    /// This item's condition evaluated false
    ConditionFailed,
}

/// Outcome of a `TransactWrite`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactWriteOutcome {
    /// All items were applied atomically
    Committed,
    /// Nothing was applied; `reasons[i]` explains item `i`
    Cancelled(Vec<ItemCancelReason>),
}

impl TransactWriteOutcome {
    /// Returns the per-item reasons if the transaction was cancelled.
    #[must_use]
    pub fn cancelled_reasons(&self) -> Option<&[ItemCancelReason]> {
        match self {
            Self::Committed => None,
            Self::Cancelled(reasons) => Some(reasons),
        }
    }
}

/// One page of a query or scan.
#[derive(Debug, Clone)]
pub struct QueryPage {
    /// Rows in this page, ascending by `(entityName, subjectName)`
    pub rows: Vec<Row>,
    /// Key to resume after, absent when the result set is exhausted
    pub last_key: Option<(String, String)>,
}

/// The raw wide-table client contract.
///
/// Implementations must provide strongly consistent reads. Paging tokens
/// are opaque resumption keys; the adapter re-issues paged requests until
/// exhaustion so callers never see them.
#[async_trait::async_trait]
pub trait WideTable: Send + Sync + 'static {
    /// Read a single row by key.
    async fn get_item(&self, entity_name: &str, subject_name: &str) -> Result<Option<Row>>;

    /// Write a row unless its key is already present.
    async fn put_item_if_absent(&self, row: Row) -> Result<PutOutcome>;

    /// Delete a row by key. Absence is not an error.
    async fn delete_item(&self, entity_name: &str, subject_name: &str) -> Result<DeleteOutcome>;

    /// Read one page of rows for a partition, optionally bounded to a
    /// `subjectName` prefix, ascending by `subjectName`.
    async fn query_page(
        &self,
        entity_name: &str,
        subject_prefix: Option<&str>,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage>;

    /// Read one page of the whole table, ascending by key.
    async fn scan_page(
        &self,
        start_after: Option<&(String, String)>,
        limit: usize,
    ) -> Result<QueryPage>;

    /// Apply up to [`MAX_TRANSACT_ITEMS`] writes atomically.
    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<TransactWriteOutcome>;

    /// Cheap reachability check used once at startup.
    async fn probe(&self) -> Result<()>;
}

/// Cancellation and deadline context threaded through every store-touching
/// operation.
///
/// The request handler derives one context per request; the adapter budgets
/// each individual store call from the remaining deadline.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context with no deadline and a private cancellation token. Used by
    /// the host runner's startup probe and by tests.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// The cancellation token for `select!`-style interruption.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the caller has cancelled this operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Budget for one store call: the remaining request deadline minus the
    /// per-call `overhead` reserve. `None` means unbounded.
    ///
    /// Returns `Err(Timeout)` when the budget is already exhausted, so a
    /// request never issues a call it cannot possibly wait for.
    pub fn call_budget(&self, overhead: Duration) -> Result<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let remaining = deadline
                    .saturating_duration_since(Instant::now())
                    .saturating_sub(overhead);
                if remaining.is_zero() {
                    Err(Error::Timeout)
                } else {
                    Ok(Some(remaining))
                }
            }
        }
    }
}
