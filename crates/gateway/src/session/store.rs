// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory session store with expired-record deletion

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tower_sessions::{
    cookie::time::OffsetDateTime,
    session::{Id, Record},
    session_store::{self, ExpiredDeletion, SessionStore},
};
use tracing::debug;

/// Session records keyed by id, shared by every clone
#[derive(Debug, Clone, Default)]
pub struct SessionMemoryStore {
    records: Arc<DashMap<Id, Record>>,
}

impl SessionMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is stored
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Delete every record expired at `now` and return how many went
    pub fn remove_expired_at(&self, now: OffsetDateTime) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.expiry_date > now);
        before.saturating_sub(self.records.len())
    }
}

#[async_trait]
impl SessionStore for SessionMemoryStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        loop {
            match self.records.entry(record.id) {
                Entry::Occupied(_) => record.id = Id::default(),
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                    return Ok(());
                }
            }
        }
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: &Id) -> session_store::Result<Option<Record>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .get(id)
            .filter(|record| record.expiry_date > now)
            .map(|record| record.value().clone()))
    }

    async fn delete(&self, id: &Id) -> session_store::Result<()> {
        self.records.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ExpiredDeletion for SessionMemoryStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        let removed = self.remove_expired_at(OffsetDateTime::now_utc());
        if removed > 0 {
            debug!(removed, remaining = self.len(), "deleted expired sessions");
        }
        Ok(())
    }
}
