use std::fmt::Debug;

use async_trait::async_trait;

use crate::{lock::LockDocument, util::exception::StoreError};

pub mod dynamo;
pub mod memory;

pub use dynamo::{DynamoConfig, DynamoStore};
pub use memory::MemoryStore;

/// The four atomic, per-document primitives the locker is built on.
///
/// Every successful write hands back a backend-defined version token; the token
/// from the latest write is the precondition for the next conditional replace.
#[async_trait]
pub trait LockStore: Send + Sync {
    type Version: Clone + Debug + PartialEq + Send + Sync;

    /// Fails with [`StoreError::Conflict`] if a document with the same id exists.
    async fn insert_if_absent(&self, doc: &LockDocument) -> Result<Self::Version, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the document is missing or its
    /// version differs from `expected`.
    async fn conditional_replace(
        &self,
        doc: &LockDocument,
        expected: &Self::Version,
    ) -> Result<Self::Version, StoreError>;

    /// Unconditional. Fails with [`StoreError::NotFound`] if nothing was deleted.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<LockDocument>, StoreError>;
}
