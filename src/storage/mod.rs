//! Key-value backing store for conversations
//!
//! The conversation store only needs a handful of primitives from its
//! backing store: scalar get/set, list append/range/remove, and an atomic
//! multi-operation batch. [`KeyValueStore`] captures that contract so the
//! store can run on the embedded [`SledStore`] in production and on
//! [`MemoryStore`] in tests.

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set a scalar key, replacing any previous value
    Set { key: String, value: String },
    /// Remove every occurrence of `value` from the list at `key`
    ListRemove { key: String, value: String },
    /// Insert `value` at the head of the list at `key`
    ListPushFront { key: String, value: String },
}

/// Ordered group of writes applied all-or-nothing
///
/// # Examples
///
/// ```
/// use parley::storage::{BatchOp, WriteBatch};
///
/// let batch = WriteBatch::new()
///     .set("chatmeta:1", "{}")
///     .list_remove("userchats:ana", "1")
///     .list_push_front("userchats:ana", "1");
/// assert_eq!(batch.len(), 3);
/// assert!(matches!(batch.ops()[2], BatchOp::ListPushFront { .. }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scalar write
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue removal of every occurrence of `value` from a list
    pub fn list_remove(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::ListRemove {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue insertion of `value` at the head of a list
    pub fn list_push_front(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::ListPushFront {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Operations in application order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch has no operations
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Backing store contract used by the conversation store
///
/// Every method is atomic with respect to the keys it touches. Values never
/// expire. Implementations must not spawn work that outlives the returned
/// future, so dropping a call is a valid way to cancel it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a scalar value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Append `value` at the tail of the list and return the new length
    async fn list_push_back(&self, key: &str, value: &str) -> Result<usize>;

    /// Read list entries starting at `start`, at most `limit` of them
    /// (`None` reads to the end). A missing list reads as empty.
    async fn list_range(&self, key: &str, start: usize, limit: Option<usize>)
        -> Result<Vec<String>>;

    /// Remove every occurrence of `value` and return how many were removed
    async fn list_remove(&self, key: &str, value: &str) -> Result<usize>;

    /// Apply every operation of the batch, or none of them
    async fn apply(&self, batch: WriteBatch) -> Result<()>;
}

/// Window a list read down to `[start, start + limit)`
pub(crate) fn slice_window(items: &[String], start: usize, limit: Option<usize>) -> Vec<String> {
    let start = start.min(items.len());
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(items.len()),
        None => items.len(),
    };
    items[start..end].to_vec()
}
