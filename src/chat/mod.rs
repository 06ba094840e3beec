//! Conversation store
//!
//! Owns chat identity, the per-chat message log, ownership records and the
//! per-user recency index. All state lives in a [`KeyValueStore`]; the store
//! itself only holds a handle to it and immutable settings, so one instance
//! can be shared freely between tasks.
//!
//! # Examples
//!
//! ```
//! use parley::chat::{ConversationStore, Role};
//! use parley::config::ChatConfig;
//! use parley::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = ConversationStore::new(Arc::new(MemoryStore::new()), &ChatConfig::default());
//! let chat = store.ensure_chat("ana@example.com").await.unwrap();
//! store
//!     .append_message("ana@example.com", &chat.id, Role::User, "hi there")
//!     .await
//!     .unwrap();
//!
//! let view = store.get_chat("ana@example.com", &chat.id).await.unwrap();
//! assert_eq!(view.summary.title, "hi there");
//! assert_eq!(view.messages.len(), 1);
//! # });
//! ```

pub mod keys;
pub mod types;

pub use types::{
    derive_title, ChatSummary, ChatView, Message, Role, DEFAULT_TITLE, TITLE_MAX_CHARS,
};

use crate::config::ChatConfig;
use crate::error::{ParleyError, Result};
use crate::metrics;
use crate::storage::{KeyValueStore, WriteBatch};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of resolving one entry of a user's chat index
#[derive(Debug)]
enum IndexEntry {
    Resolved(ChatSummary),
    Skipped { chat_id: String, reason: String },
}

/// Persistent store of chats and their message logs
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    list_window: usize,
}

impl ConversationStore {
    /// Create a store over `kv`
    ///
    /// # Arguments
    ///
    /// * `kv` - Backing store shared with any other users of it
    /// * `config` - Chat settings; `list_window` bounds [`list_chats`]
    ///
    /// [`list_chats`]: ConversationStore::list_chats
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &ChatConfig) -> Self {
        Self {
            kv,
            list_window: config.list_window,
        }
    }

    /// Return the user's most recently touched chat, creating one if the
    /// user has none
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if the backing store fails
    pub async fn ensure_chat(&self, user: &str) -> Result<ChatSummary> {
        if let Some(latest) = self.list_chats(user).await?.into_iter().next() {
            return Ok(latest);
        }
        self.new_chat(user, DEFAULT_TITLE).await
    }

    /// Create a chat owned by `user`
    ///
    /// A blank title is replaced with [`DEFAULT_TITLE`]. The summary, the
    /// ownership record and the index entry are written in one batch.
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if the batch fails, in which case
    /// nothing was written
    pub async fn new_chat(&self, user: &str, title: &str) -> Result<ChatSummary> {
        let title = if title.trim().is_empty() {
            DEFAULT_TITLE
        } else {
            title
        };
        let summary = ChatSummary {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            updated_at: Utc::now(),
        };

        self.save_summary(user, &summary).await?;
        metrics::record_chat_created();
        tracing::info!(chat_id = %summary.id, "Created chat");
        Ok(summary)
    }

    /// List the user's chats, most recently touched first
    ///
    /// At most `list_window` chats are returned. Index entries whose summary
    /// is missing or unreadable are skipped and logged.
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Storage` if the index itself cannot be read
    pub async fn list_chats(&self, user: &str) -> Result<Vec<ChatSummary>> {
        let ids = self
            .kv
            .list_range(&keys::user_chats(user), 0, Some(self.list_window))
            .await?;

        let mut summaries = Vec::with_capacity(ids.len());
        for chat_id in ids {
            match self.resolve_index_entry(chat_id).await {
                IndexEntry::Resolved(summary) => summaries.push(summary),
                IndexEntry::Skipped { chat_id, reason } => {
                    tracing::warn!(chat_id = %chat_id, "Skipping chat in listing: {}", reason);
                    metrics::record_list_entry_skipped();
                }
            }
        }
        Ok(summaries)
    }

    /// Fetch a chat and its full message log
    ///
    /// # Errors
    ///
    /// - `ParleyError::Unauthorized` if `user` does not own the chat or the
    ///   chat does not exist
    /// - `ParleyError::Storage` if the backing store fails
    pub async fn get_chat(&self, user: &str, chat_id: &str) -> Result<ChatView> {
        self.authorize(user, chat_id).await?;
        let summary = self.load_summary(chat_id).await?;
        let messages = self.load_messages(chat_id).await?;
        Ok(ChatView { summary, messages })
    }

    /// Append a message to the tail of a chat's log and touch the chat
    ///
    /// The first non-blank content appended to a chat still carrying the
    /// default title becomes its title.
    ///
    /// # Errors
    ///
    /// - `ParleyError::Unauthorized` if `user` does not own the chat
    /// - `ParleyError::Storage` if the backing store fails. The message may
    ///   already be stored when the touch is what failed.
    pub async fn append_message(
        &self,
        user: &str,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.authorize(user, chat_id).await?;
        self.store_message(user, chat_id, Message::new(role, content))
            .await
    }

    /// Fail with `Unauthorized` unless `user` owns `chat_id`
    pub(crate) async fn authorize(&self, user: &str, chat_id: &str) -> Result<()> {
        match self.kv.get(&keys::chat_owner(chat_id)).await? {
            Some(owner) if owner == user => Ok(()),
            _ => {
                tracing::warn!(chat_id = %chat_id, "Denied access to chat");
                Err(ParleyError::Unauthorized.into())
            }
        }
    }

    /// Store an already authorized message and touch the chat
    pub(crate) async fn store_message(
        &self,
        user: &str,
        chat_id: &str,
        message: Message,
    ) -> Result<Message> {
        let payload = serde_json::to_string(&message).map_err(ParleyError::from)?;
        let len = self
            .kv
            .list_push_back(&keys::chat_messages(chat_id), &payload)
            .await?;
        metrics::record_message_appended(message.role);
        tracing::debug!(chat_id = %chat_id, role = %message.role, len, "Appended message");

        self.touch(user, chat_id, &message.content).await?;
        Ok(message)
    }

    /// Full message log of a chat in append order, without authorization
    pub(crate) async fn load_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let raw = self
            .kv
            .list_range(&keys::chat_messages(chat_id), 0, None)
            .await?;

        let mut messages = Vec::with_capacity(raw.len());
        for (position, entry) in raw.iter().enumerate() {
            match serde_json::from_str::<Message>(entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        position,
                        "Skipping undecodable message: {}",
                        e
                    );
                }
            }
        }
        Ok(messages)
    }

    /// Refresh a chat's timestamp, derive its title once, and move it to the
    /// front of the owner's index
    ///
    /// Read-modify-write with no version check: concurrent touches of the
    /// same chat are last-write-wins.
    pub(crate) async fn touch(
        &self,
        user: &str,
        chat_id: &str,
        trigger: &str,
    ) -> Result<ChatSummary> {
        let mut summary = self.load_summary(chat_id).await?;
        if summary.has_default_title() {
            if let Some(title) = derive_title(trigger) {
                summary.title = title;
            }
        }
        summary.updated_at = Utc::now();

        self.save_summary(user, &summary).await?;
        Ok(summary)
    }

    async fn load_summary(&self, chat_id: &str) -> Result<ChatSummary> {
        let raw = self
            .kv
            .get(&keys::chat_meta(chat_id))
            .await?
            .ok_or_else(|| ParleyError::Storage(format!("Chat {} has no summary", chat_id)))?;
        let summary = serde_json::from_str(&raw).map_err(|e| {
            ParleyError::Storage(format!("Corrupt summary for chat {}: {}", chat_id, e))
        })?;
        Ok(summary)
    }

    async fn resolve_index_entry(&self, chat_id: String) -> IndexEntry {
        match self.load_summary(&chat_id).await {
            Ok(summary) => IndexEntry::Resolved(summary),
            Err(e) => IndexEntry::Skipped {
                chat_id,
                reason: e.to_string(),
            },
        }
    }

    async fn save_summary(&self, user: &str, summary: &ChatSummary) -> Result<()> {
        let payload = serde_json::to_string(summary).map_err(ParleyError::from)?;
        let index = keys::user_chats(user);
        let batch = WriteBatch::new()
            .set(keys::chat_meta(&summary.id), payload)
            .set(keys::chat_owner(&summary.id), user)
            .list_remove(index.clone(), summary.id.clone())
            .list_push_front(index, summary.id.clone());
        self.kv.apply(batch).await
    }
}
