//! In-process backing store
//!
//! Keeps every key in a single mutex-guarded map. Batches are staged on
//! copies of the touched entries and committed only once every operation
//! succeeded, which gives the same all-or-nothing behaviour as the sled
//! transaction in [`super::SledStore`].

use super::{slice_window, BatchOp, KeyValueStore, WriteBatch};
use crate::error::{ParleyError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Entry {
    Scalar(String),
    List(VecDeque<String>),
}

/// Backing store held entirely in memory
///
/// Nothing survives the process. Used by tests and by `--ephemeral` runs.
///
/// # Examples
///
/// ```
/// use parley::storage::{KeyValueStore, MemoryStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.list_push_back("log", "first").await.unwrap();
/// store.list_push_back("log", "second").await.unwrap();
/// let all = store.list_range("log", 0, None).await.unwrap();
/// assert_eq!(all, vec!["first", "second"]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| ParleyError::Storage("memory store lock poisoned".to_string()).into())
    }
}

fn wrong_type(key: &str) -> anyhow::Error {
    ParleyError::Storage(format!("wrong value type at key {}", key)).into()
}

fn list_mut<'a>(entry: &'a mut Option<Entry>, key: &str) -> Result<&'a mut VecDeque<String>> {
    let entry = entry.get_or_insert_with(|| Entry::List(VecDeque::new()));
    match entry {
        Entry::List(list) => Ok(list),
        Entry::Scalar(_) => Err(wrong_type(key)),
    }
}

fn remove_all(list: &mut VecDeque<String>, value: &str) -> usize {
    let before = list.len();
    list.retain(|item| item != value);
    before - list.len()
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.lock()?.get(key) {
            None => Ok(None),
            Some(Entry::Scalar(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(Entry::List(_)) = entries.get(key) {
            return Err(wrong_type(key));
        }
        entries.insert(key.to_string(), Entry::Scalar(value.to_string()));
        Ok(())
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<usize> {
        let mut entries = self.lock()?;
        let mut slot = entries.remove(key);
        let pushed = list_mut(&mut slot, key).map(|list| {
            list.push_back(value.to_string());
            list.len()
        });
        if let Some(entry) = slot {
            entries.insert(key.to_string(), entry);
        }
        pushed
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        match self.lock()?.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => {
                let items: Vec<String> = list.iter().cloned().collect();
                Ok(slice_window(&items, start, limit))
            }
            Some(Entry::Scalar(_)) => Err(wrong_type(key)),
        }
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(remove_all(list, value)),
            Some(Entry::Scalar(_)) => Err(wrong_type(key)),
        }
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.lock()?;
        let mut staged: HashMap<String, Option<Entry>> = HashMap::new();

        for op in batch.ops() {
            match op {
                BatchOp::Set { key, value } => {
                    let slot = staged
                        .entry(key.clone())
                        .or_insert_with(|| entries.get(key).cloned());
                    if let Some(Entry::List(_)) = slot {
                        return Err(wrong_type(key));
                    }
                    *slot = Some(Entry::Scalar(value.clone()));
                }
                BatchOp::ListRemove { key, value } => {
                    let slot = staged
                        .entry(key.clone())
                        .or_insert_with(|| entries.get(key).cloned());
                    remove_all(list_mut(slot, key)?, value);
                }
                BatchOp::ListPushFront { key, value } => {
                    let slot = staged
                        .entry(key.clone())
                        .or_insert_with(|| entries.get(key).cloned());
                    list_mut(slot, key)?.push_front(value.clone());
                }
            }
        }

        for (key, entry) in staged {
            if let Some(entry) = entry {
                entries.insert(key, entry);
            }
        }
        Ok(())
    }
}
