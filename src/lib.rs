//! Parley - persistent multi-chat conversations with a language model
//!
//! This library stores a user's independent chats, runs completions against
//! an OpenAI-compatible backend, and normalizes per-session model
//! preferences.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: Key-value backing store contract with sled and in-memory implementations
//! - `chat`: Conversation store (chat identity, ownership, message logs, recency index)
//! - `completion`: Completion backend contract and the OpenAI-compatible client
//! - `orchestrator`: Load the log, ask the backend, store the reply
//! - `preferences`: Model and temperature resolution
//! - `metrics`: Counters and histograms for chats and completions
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```
//! use parley::chat::ConversationStore;
//! use parley::config::Config;
//! use parley::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = Config::default();
//! config.validate().unwrap();
//!
//! let store = ConversationStore::new(Arc::new(MemoryStore::new()), &config.chat);
//! let chat = store.new_chat("ana@example.com", "").await.unwrap();
//! assert_eq!(chat.title, "New chat");
//! # });
//! ```

pub mod chat;
pub mod cli;
pub mod commands;
pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod preferences;
pub mod storage;

// Re-export commonly used types
pub use chat::{ChatSummary, ChatView, ConversationStore, Message, Role};
pub use config::Config;
pub use error::{ParleyError, Result};
pub use orchestrator::{CompletionOrchestrator, Exchange};
