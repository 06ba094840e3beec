//! Command handlers for the CLI
//!
//! - `chats`: list, create, ensure and show chats
//! - `messages`: append messages and run completions
//! - `prefs`: inspect preference resolution
//!
//! Handlers print to stdout and leave diagnostics to `tracing`.

use crate::config::Config;
use crate::error::Result;
use crate::storage::{KeyValueStore, MemoryStore, SledStore};
use std::sync::Arc;

pub mod chats;
pub mod messages;
pub mod prefs;

/// Open the backing store selected by configuration
///
/// # Arguments
///
/// * `config` - Loaded configuration; `storage.path` picks the database
/// * `ephemeral` - Use an in-memory store instead of opening a database
///
/// # Errors
///
/// Returns `ParleyError::Storage` if the database cannot be opened
pub fn open_store(config: &Config, ephemeral: bool) -> Result<Arc<dyn KeyValueStore>> {
    if ephemeral {
        tracing::info!("Using in-memory store, nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = match &config.storage.path {
        Some(path) => path.clone(),
        None => SledStore::default_path()?,
    };
    tracing::info!("Using chat database at {}", path.display());
    Ok(Arc::new(SledStore::open(path)?))
}

/// Shorten a string to `max` characters for table display
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}
