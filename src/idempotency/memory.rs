//! In-memory idempotency store for tests and single-process deployments.
//! The dashmap entry API gives the conditional-insert atomicity the contract
//! requires.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{IdempotencyRecord, IdempotencyResult, IdempotencyStore, InsertOutcome};

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, request_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        Ok(self.records.get(request_id).map(|r| r.clone()))
    }

    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
    ) -> IdempotencyResult<InsertOutcome> {
        match self.records.entry(record.request_id.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::AlreadyCompleted(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}
