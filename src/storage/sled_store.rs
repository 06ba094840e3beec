//! Durable backing store on an embedded `sled` database
//!
//! Scalars live in the `values` tree. Lists are spread over two trees: every
//! element sits in `lists` under `key ++ 0x00 ++ seq` (big-endian), and the
//! `bounds` tree keeps each list's head and tail sequence numbers and its
//! length. A prefix scan therefore yields a list in order, and appending or
//! prepending touches one element plus the bounds record.
//!
//! Sequence numbers start in the middle of the `u64` range so a list can grow
//! in both directions. Bounds never move back, so a list whose bounds record
//! is unchanged has not been modified.

use super::{BatchOp, KeyValueStore, WriteBatch};
use crate::error::{ParleyError, Result};
use anyhow::Context;
use async_trait::async_trait;
use directories::ProjectDirs;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, IVec, Transactional, Tree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const VALUES_TREE: &str = "values";
const LISTS_TREE: &str = "lists";
const BOUNDS_TREE: &str = "bounds";

const SEQ_ORIGIN: u64 = 1 << 63;
const MAX_BATCH_ATTEMPTS: usize = 64;

/// Backing store persisted with `sled`
pub struct SledStore {
    db: Db,
    values: Tree,
    lists: Tree,
    bounds: Tree,
}

/// Position and size of one list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListBounds {
    /// Sequence number of the first element
    head: u64,
    /// Sequence number the next appended element gets
    tail: u64,
    len: u64,
}

impl Default for ListBounds {
    fn default() -> Self {
        Self {
            head: SEQ_ORIGIN,
            tail: SEQ_ORIGIN,
            len: 0,
        }
    }
}

impl ListBounds {
    fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(24);
        raw.extend_from_slice(&self.head.to_be_bytes());
        raw.extend_from_slice(&self.tail.to_be_bytes());
        raw.extend_from_slice(&self.len.to_be_bytes());
        raw
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != 24 {
            return None;
        }
        let mut words = raw.chunks_exact(8).map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_be_bytes(word)
        });
        Some(Self {
            head: words.next()?,
            tail: words.next()?,
            len: words.next()?,
        })
    }
}

/// Why a list transaction gave up
#[derive(Debug)]
enum ListAbort {
    /// A list changed between scanning it and committing
    Stale,
    /// The bounds record of the named list is unreadable
    Corrupt(String),
}

/// Element keys matched by each `ListRemove` of a batch, with the bounds
/// every scanned list had before its scan
struct RemovalPlan {
    seen: HashMap<String, ListBounds>,
    targets: Vec<Vec<IVec>>,
}

fn element_prefix(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(key.len() + 9);
    prefix.extend_from_slice(key.as_bytes());
    prefix.push(0);
    prefix
}

fn element_key(key: &str, seq: u64) -> Vec<u8> {
    let mut element = element_prefix(key);
    element.extend_from_slice(&seq.to_be_bytes());
    element
}

fn read_bounds(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<ListBounds, ListAbort> {
    match tree.get(key.as_bytes())? {
        None => Ok(ListBounds::default()),
        Some(raw) => ListBounds::decode(&raw).ok_or_else(|| {
            ConflictableTransactionError::Abort(ListAbort::Corrupt(key.to_string()))
        }),
    }
}

fn write_bounds(
    tree: &TransactionalTree,
    key: &str,
    bounds: ListBounds,
) -> ConflictableTransactionResult<(), ListAbort> {
    tree.insert(key.as_bytes(), bounds.encode())?;
    Ok(())
}

fn list_failed(err: TransactionError<ListAbort>) -> anyhow::Error {
    let message = match err {
        TransactionError::Abort(ListAbort::Stale) => "List changed during update".to_string(),
        TransactionError::Abort(ListAbort::Corrupt(key)) => {
            format!("Corrupt list bounds at {}", key)
        }
        TransactionError::Storage(e) => format!("Transaction failed: {}", e),
    };
    ParleyError::Storage(message).into()
}

impl SledStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    ///
    /// - `ParleyError::Io` if the parent directory cannot be created
    /// - `ParleyError::Storage` if the database cannot be opened
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::SledStore;
    ///
    /// # fn main() -> parley::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let store = SledStore::open(dir.path().join("chats.sled"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(ParleyError::from)
                .with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
        }

        let db = sled::open(path)
            .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;
        tracing::debug!("Opened sled store at {}", path.display());
        Self::from_db(db)
    }

    /// Open a throwaway store that is removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;
        Self::from_db(db)
    }

    /// Default database location inside the user's data directory
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "parley", "parley")
            .ok_or_else(|| ParleyError::Storage("Could not determine data directory".into()))?;
        Ok(proj_dirs.data_dir().join("chats.sled"))
    }

    fn from_db(db: Db) -> Result<Self> {
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| ParleyError::Storage(format!("Failed to open tree {}: {}", name, e)))
        };
        let values = open_tree(VALUES_TREE)?;
        let lists = open_tree(LISTS_TREE)?;
        let bounds = open_tree(BOUNDS_TREE)?;
        Ok(Self {
            db,
            values,
            lists,
            bounds,
        })
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| ParleyError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn load_bounds(&self, key: &str) -> Result<ListBounds> {
        let raw = self
            .bounds
            .get(key)
            .map_err(|e| ParleyError::Storage(format!("Get failed: {}", e)))?;
        match raw {
            None => Ok(ListBounds::default()),
            Some(raw) => ListBounds::decode(&raw).ok_or_else(|| {
                ParleyError::Storage(format!("Corrupt list bounds at {}", key)).into()
            }),
        }
    }

    fn scan_matching(&self, key: &str, value: &str) -> Result<Vec<IVec>> {
        let mut found = Vec::new();
        for entry in self.lists.scan_prefix(element_prefix(key)) {
            let (element, stored) =
                entry.map_err(|e| ParleyError::Storage(format!("Scan failed: {}", e)))?;
            if &*stored == value.as_bytes() {
                found.push(element);
            }
        }
        Ok(found)
    }

    /// Scan every list a `ListRemove` touches, reading its bounds first
    fn plan_removals(&self, ops: &[BatchOp]) -> Result<RemovalPlan> {
        let mut seen = HashMap::new();
        let mut targets = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                BatchOp::ListRemove { key, value } => {
                    if !seen.contains_key(key) {
                        seen.insert(key.clone(), self.load_bounds(key)?);
                    }
                    targets.push(self.scan_matching(key, value)?);
                }
                _ => targets.push(Vec::new()),
            }
        }
        Ok(RemovalPlan { seen, targets })
    }

    /// Apply `ops` in one transaction over all three trees and return how
    /// many list elements were removed
    ///
    /// sled transactions cannot scan, so removals are planned beforehand and
    /// the transaction aborts as stale when any planned list moved since.
    async fn run_batch(&self, ops: &[BatchOp]) -> Result<usize> {
        for attempt in 1..=MAX_BATCH_ATTEMPTS {
            let plan = self.plan_removals(ops)?;
            let outcome = (&self.values, &self.lists, &self.bounds).transaction(
                |(values, lists, bounds)| -> ConflictableTransactionResult<usize, ListAbort> {
                    for (key, seen) in &plan.seen {
                        if read_bounds(bounds, key)? != *seen {
                            return Err(ConflictableTransactionError::Abort(ListAbort::Stale));
                        }
                    }

                    let mut pushed: Vec<(&str, &str, Vec<u8>)> = Vec::new();
                    let mut removed = 0usize;
                    for (op, targets) in ops.iter().zip(&plan.targets) {
                        match op {
                            BatchOp::Set { key, value } => {
                                values.insert(key.as_bytes(), value.as_bytes())?;
                            }
                            BatchOp::ListRemove { key, value } => {
                                let mut list = read_bounds(bounds, key)?;
                                let fresh = pushed
                                    .iter()
                                    .filter(|(k, v, _)| *k == key.as_str() && *v == value.as_str())
                                    .map(|(_, _, element)| element.as_slice());
                                let mut count = 0u64;
                                for element in targets.iter().map(|e| &**e).chain(fresh) {
                                    if lists.remove(element)?.is_some() {
                                        count += 1;
                                    }
                                }
                                if count > 0 {
                                    list.len = list.len.saturating_sub(count);
                                    write_bounds(bounds, key, list)?;
                                    removed += count as usize;
                                }
                            }
                            BatchOp::ListPushFront { key, value } => {
                                let mut list = read_bounds(bounds, key)?;
                                list.head = list.head.checked_sub(1).ok_or_else(|| {
                                    ConflictableTransactionError::Abort(ListAbort::Corrupt(
                                        key.clone(),
                                    ))
                                })?;
                                list.len += 1;
                                let element = element_key(key, list.head);
                                lists.insert(element.clone(), value.as_bytes())?;
                                write_bounds(bounds, key, list)?;
                                pushed.push((key.as_str(), value.as_str(), element));
                            }
                        }
                    }
                    Ok(removed)
                },
            );

            match outcome {
                Ok(removed) => return Ok(removed),
                Err(TransactionError::Abort(ListAbort::Stale)) => {
                    tracing::debug!(attempt, "List changed while batch was planned, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(list_failed(e)),
            }
        }

        Err(ParleyError::Storage(format!(
            "Lists kept changing, batch abandoned after {} attempts",
            MAX_BATCH_ATTEMPTS
        ))
        .into())
    }

    /// Replace the raw bytes of the list element at `position`
    #[cfg(test)]
    pub(crate) fn overwrite_list_entry(&self, key: &str, position: usize, raw: &[u8]) -> Result<()> {
        let entry = self
            .lists
            .scan_prefix(element_prefix(key))
            .nth(position)
            .ok_or_else(|| ParleyError::Storage(format!("No entry {} in {}", position, key)))?;
        let (element, _) = entry.map_err(|e| ParleyError::Storage(e.to_string()))?;
        self.lists
            .insert(element, raw)
            .map_err(|e| ParleyError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let raw = self
            .values
            .get(key)
            .map_err(|e| ParleyError::Storage(format!("Get failed: {}", e)))?;
        match raw {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ParleyError::Storage(format!("Value at {} is not UTF-8: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .insert(key, value.as_bytes())
            .map_err(|e| ParleyError::Storage(format!("Insert failed: {}", e)))?;
        self.flush().await
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<usize> {
        let len = (&self.lists, &self.bounds)
            .transaction(
                |(lists, bounds)| -> ConflictableTransactionResult<u64, ListAbort> {
                    let mut list = read_bounds(bounds, key)?;
                    lists.insert(element_key(key, list.tail), value.as_bytes())?;
                    list.tail += 1;
                    list.len += 1;
                    write_bounds(bounds, key, list)?;
                    Ok(list.len)
                },
            )
            .map_err(list_failed)?;
        self.flush().await?;
        Ok(len as usize)
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut items = Vec::new();
        let window = self
            .lists
            .scan_prefix(element_prefix(key))
            .skip(start)
            .take(limit.unwrap_or(usize::MAX));
        for entry in window {
            let (_, raw) = entry.map_err(|e| ParleyError::Storage(format!("Scan failed: {}", e)))?;
            let item = match String::from_utf8(raw.to_vec()) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(key, "List entry is not UTF-8, keeping a lossy copy");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            items.push(item);
        }
        Ok(items)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let op = BatchOp::ListRemove {
            key: key.to_string(),
            value: value.to_string(),
        };
        let removed = self.run_batch(std::slice::from_ref(&op)).await?;
        self.flush().await?;
        Ok(removed)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        self.run_batch(batch.ops()).await?;
        tracing::debug!("Applied batch of {} operations", batch.len());
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (SledStore, TempDir) {
        let dir = TempDir::new().expect("failed to create tempdir");
        let store = SledStore::open(dir.path().join("chats.sled")).expect("failed to open store");
        (store, dir)
    }

    #[test]
    fn test_list_bounds_encoding() {
        let bounds = ListBounds {
            head: SEQ_ORIGIN - 2,
            tail: SEQ_ORIGIN + 5,
            len: 6,
        };
        assert_eq!(ListBounds::decode(&bounds.encode()), Some(bounds));
        assert_eq!(ListBounds::decode(b"short"), None);
    }

    #[test]
    fn test_element_keys_sort_by_sequence() {
        let before = element_key("log", SEQ_ORIGIN - 1);
        let after = element_key("log", SEQ_ORIGIN);
        assert!(before < after);
        assert!(before.starts_with(&element_prefix("log")));
        assert!(!element_key("logs", SEQ_ORIGIN).starts_with(&element_prefix("log")));
    }

    #[tokio::test]
    async fn test_open_creates_nested_parent_directory() {
        let dir = TempDir::new().expect("failed to create tempdir");
        let path = dir.path().join("nested").join("chats.sled");
        let _store = SledStore::open(&path).expect("open failed");
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_open_below_a_file_is_io_error() {
        let dir = TempDir::new().expect("failed to create tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = SledStore::open(blocker.join("db").join("chats.sled"))
            .err()
            .expect("open should fail");
        assert!(matches!(
            err.downcast_ref::<ParleyError>(),
            Some(ParleyError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_set_and_get_scalar() {
        let (store, _dir) = create_test_store();
        store.set("chatowner:1", "ana@example.com").await.unwrap();
        assert_eq!(
            store.get("chatowner:1").await.unwrap().as_deref(),
            Some("ana@example.com")
        );
        assert!(store.get("chatowner:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_push_back_and_range() {
        let (store, _dir) = create_test_store();
        for (i, value) in ["one", "two", "three"].iter().enumerate() {
            let len = store.list_push_back("log", value).await.unwrap();
            assert_eq!(len, i + 1);
        }
        assert_eq!(
            store.list_range("log", 0, None).await.unwrap(),
            vec!["one", "two", "three"]
        );
        assert_eq!(
            store.list_range("log", 0, Some(2)).await.unwrap(),
            vec!["one", "two"]
        );
        assert_eq!(
            store.list_range("log", 1, Some(1)).await.unwrap(),
            vec!["two"]
        );
        assert!(store.list_range("log", 5, None).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_with_shared_prefix_stay_apart() {
        let (store, _dir) = create_test_store();
        store.list_push_back("userchats:ana", "1").await.unwrap();
        store.list_push_back("userchats:anabel", "2").await.unwrap();

        assert_eq!(
            store.list_range("userchats:ana", 0, None).await.unwrap(),
            vec!["1"]
        );
    }

    #[tokio::test]
    async fn test_list_remove() {
        let (store, _dir) = create_test_store();
        for value in ["a", "b", "a"] {
            store.list_push_back("l", value).await.unwrap();
        }
        assert_eq!(store.list_remove("l", "a").await.unwrap(), 2);
        assert_eq!(store.list_remove("l", "zzz").await.unwrap(), 0);
        assert_eq!(store.list_range("l", 0, None).await.unwrap(), vec!["b"]);
        assert_eq!(store.list_push_back("l", "c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_push_front_and_back_keep_order() {
        let (store, _dir) = create_test_store();
        store.list_push_back("l", "b").await.unwrap();
        store
            .apply(WriteBatch::new().list_push_front("l", "a"))
            .await
            .unwrap();
        store.list_push_back("l", "c").await.unwrap();

        assert_eq!(
            store.list_range("l", 0, None).await.unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_apply_batch_writes_both_trees() {
        let (store, _dir) = create_test_store();
        store.list_push_back("idx", "old").await.unwrap();
        store.list_push_back("idx", "chat").await.unwrap();

        let batch = WriteBatch::new()
            .set("meta", "{\"title\":\"x\"}")
            .set("owner", "ana")
            .list_remove("idx", "chat")
            .list_push_front("idx", "chat");
        store.apply(batch).await.unwrap();

        assert_eq!(store.get("owner").await.unwrap().as_deref(), Some("ana"));
        assert_eq!(
            store.list_range("idx", 0, None).await.unwrap(),
            vec!["chat", "old"]
        );
    }

    #[tokio::test]
    async fn test_remove_sees_entries_pushed_earlier_in_batch() {
        let (store, _dir) = create_test_store();
        let batch = WriteBatch::new()
            .list_push_front("l", "x")
            .list_push_front("l", "y")
            .list_remove("l", "x");
        store.apply(batch).await.unwrap();

        assert_eq!(store.list_range("l", 0, None).await.unwrap(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let (store, _dir) = create_test_store();
        // Unreadable bounds make any mutation of the list abort
        store
            .bounds
            .insert("broken", b"short".to_vec())
            .expect("raw insert");

        let batch = WriteBatch::new()
            .set("meta", "value")
            .list_push_front("broken", "x");
        let err = store.apply(batch).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParleyError>(),
            Some(ParleyError::Storage(_))
        ));
        assert!(store.get("meta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_does_not_hide_neighbours() {
        let (store, _dir) = create_test_store();
        for value in ["first", "second", "third"] {
            store.list_push_back("log", value).await.unwrap();
        }
        store
            .overwrite_list_entry("log", 1, &[0xff, 0xfe, 0x00])
            .unwrap();

        let items = store.list_range("log", 0, None).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], "first");
        assert_ne!(items[1], "second");
        assert_eq!(items[2], "third");

        assert_eq!(store.list_push_back("log", "fourth").await.unwrap(), 4);
        assert_eq!(
            store.list_range("log", 3, None).await.unwrap(),
            vec!["fourth"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_push_back_keeps_every_entry() {
        let store = Arc::new(SledStore::temporary().unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.list_push_back("log", &format!("m{}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let items = store.list_range("log", 0, None).await.unwrap();
        assert_eq!(items.len(), 16);
        let unique: HashSet<&String> = items.iter().collect();
        assert_eq!(unique.len(), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_promotions_never_duplicate() {
        let store = Arc::new(SledStore::temporary().unwrap());
        for id in ["a", "b", "c"] {
            store.list_push_back("idx", id).await.unwrap();
        }

        let mut handles = Vec::new();
        for round in 0..24 {
            let store = store.clone();
            let id = ["a", "b", "c"][round % 3];
            handles.push(tokio::spawn(async move {
                let batch = WriteBatch::new()
                    .list_remove("idx", id)
                    .list_push_front("idx", id);
                store.apply(batch).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut items = store.list_range("idx", 0, None).await.unwrap();
        items.sort();
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().expect("failed to create tempdir");
        let path = dir.path().join("chats.sled");
        {
            let store = SledStore::open(&path).unwrap();
            store.set("k", "v").await.unwrap();
            store.list_push_back("l", "item").await.unwrap();
            store
                .apply(WriteBatch::new().list_push_front("l", "head"))
                .await
                .unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(
            store.list_range("l", 0, None).await.unwrap(),
            vec!["head", "item"]
        );
        assert_eq!(store.list_push_back("l", "tail").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_temporary_store() {
        let store = SledStore::temporary().unwrap();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
