use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::LockStore;
use crate::{lock::LockDocument, util::exception::StoreError};

/// In-process lock store.
///
/// Versions come from a single counter, so a token is never handed out twice even
/// when a document is deleted and created again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, (LockDocument, u64)>>,
    next_version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    type Version = u64;

    async fn insert_if_absent(&self, doc: &LockDocument) -> Result<u64, StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&doc.id) {
            return Err(StoreError::Conflict(doc.id.clone()));
        }

        let version = self.bump_version();
        documents.insert(doc.id.clone(), (doc.clone(), version));
        Ok(version)
    }

    async fn conditional_replace(
        &self,
        doc: &LockDocument,
        expected: &u64,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(&doc.id) {
            Some((current, version)) if *version == *expected => {
                let next = self.bump_version();
                *current = doc.clone();
                *version = next;
                Ok(next)
            }
            _ => Err(StoreError::Conflict(doc.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self.documents.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<LockDocument>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .get(id)
            .map(|(doc, _)| doc.clone()))
    }
}
