//! In-memory wide table.
//!
//! Backs the host runner's `store: memory` backend and every test. Keys are
//! held in a `BTreeMap` so prefix queries come back in the ascending
//! `subjectName` order the table contract promises, and pages are served
//! with real resumption keys so the adapter's pagination loop is exercised
//! rather than bypassed.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::trace;

use crate::{Error, Result};

use super::{
    Condition, DeleteOutcome, ItemCancelReason, PutOutcome, QueryPage, Row,
    TransactWriteOutcome, WideTable, WriteOp, MAX_TRANSACT_ITEMS,
};

/// Default page size. Small enough that multi-page behavior shows up in
/// ordinary tests.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// In-memory implementation of [`WideTable`].
pub struct InMemoryTable {
    rows: RwLock<BTreeMap<(String, String), ()>>,
}

impl InMemoryTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of rows currently stored. Test observability.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check_condition(
        rows: &BTreeMap<(String, String), ()>,
        entity_name: &str,
        subject_name: &str,
        condition: Condition,
    ) -> bool {
        let present = rows.contains_key(&(entity_name.to_string(), subject_name.to_string()));
        match condition {
            Condition::Exists => present,
            Condition::Absent => !present,
        }
    }
}

impl Default for InMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WideTable for InMemoryTable {
    async fn get_item(&self, entity_name: &str, subject_name: &str) -> Result<Option<Row>> {
        let rows = self.rows.read();
        let key = (entity_name.to_string(), subject_name.to_string());
        Ok(rows
            .contains_key(&key)
            .then(|| Row::new(entity_name, subject_name)))
    }

    async fn put_item_if_absent(&self, row: Row) -> Result<PutOutcome> {
        let mut rows = self.rows.write();
        let key = (row.entity_name, row.subject_name);
        if rows.contains_key(&key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        rows.insert(key, ());
        Ok(PutOutcome::Inserted)
    }

    async fn delete_item(&self, entity_name: &str, subject_name: &str) -> Result<DeleteOutcome> {
        let mut rows = self.rows.write();
        let key = (entity_name.to_string(), subject_name.to_string());
        Ok(match rows.remove(&key) {
            Some(()) => DeleteOutcome::Deleted,
            None => DeleteOutcome::Absent,
        })
    }

    async fn query_page(
        &self,
        entity_name: &str,
        subject_prefix: Option<&str>,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage> {
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        let rows = self.rows.read();

        let page: Vec<Row> = rows
            .range((entity_name.to_string(), String::new())..)
            .take_while(|((entity, _), ())| entity.as_str() == entity_name)
            .map(|((entity, subject), ())| Row::new(entity.clone(), subject.clone()))
            .filter(|row| subject_prefix.is_none_or(|p| row.subject_name.starts_with(p)))
            .filter(|row| start_after.is_none_or(|after| row.subject_name.as_str() > after))
            .take(limit + 1)
            .collect();

        Ok(paginate(page, limit))
    }

    async fn scan_page(
        &self,
        start_after: Option<&(String, String)>,
        limit: usize,
    ) -> Result<QueryPage> {
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        let rows = self.rows.read();

        let page: Vec<Row> = rows
            .keys()
            .filter(|key| start_after.is_none_or(|after| *key > after))
            .map(|(entity, subject)| Row::new(entity.clone(), subject.clone()))
            .take(limit + 1)
            .collect();

        Ok(paginate(page, limit))
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<TransactWriteOutcome> {
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(Error::internal(format!(
                "transaction of {} items exceeds the {MAX_TRANSACT_ITEMS}-item limit",
                ops.len()
            )));
        }

        let mut rows = self.rows.write();

        // First pass: evaluate every condition against the pre-transaction
        // state. Any failure cancels the whole transaction.
        let reasons: Vec<ItemCancelReason> = ops
            .iter()
            .map(|op| {
                let (entity, subject, condition) = match op {
                    WriteOp::Put { row, condition } => {
                        (&row.entity_name, &row.subject_name, *condition)
                    }
                    WriteOp::Delete {
                        entity_name,
                        subject_name,
                        condition,
                    } => (entity_name, subject_name, *condition),
                    WriteOp::Check {
                        entity_name,
                        subject_name,
                        condition,
                    } => (entity_name, subject_name, Some(*condition)),
                };
                match condition {
                    Some(c) if !Self::check_condition(&rows, entity, subject, c) => {
                        ItemCancelReason::ConditionFailed
                    }
                    _ => ItemCancelReason::None,
                }
            })
            .collect();

        if reasons
            .iter()
            .any(|r| *r == ItemCancelReason::ConditionFailed)
        {
            trace!(items = ops.len(), "Transaction cancelled by condition");
            return Ok(TransactWriteOutcome::Cancelled(reasons));
        }

        // Second pass: apply.
        for op in ops {
            match op {
                WriteOp::Put { row, .. } => {
                    rows.insert((row.entity_name, row.subject_name), ());
                }
                WriteOp::Delete {
                    entity_name,
                    subject_name,
                    ..
                } => {
                    rows.remove(&(entity_name, subject_name));
                }
                WriteOp::Check { .. } => {}
            }
        }

        Ok(TransactWriteOutcome::Committed)
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

fn paginate(mut page: Vec<Row>, limit: usize) -> QueryPage {
    if page.len() > limit {
        page.truncate(limit);
        let last = page.last().expect("page is non-empty after truncate");
        QueryPage {
            last_key: Some((last.entity_name.clone(), last.subject_name.clone())),
            rows: page,
        }
    } else {
        QueryPage {
            rows: page,
            last_key: None,
        }
    }
}
