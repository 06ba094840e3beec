use crate::error::ParleyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Title every chat carries until its first non-empty message arrives
pub const DEFAULT_TITLE: &str = "New chat";

/// Number of characters kept when a title is derived from message content
pub const TITLE_MAX_CHARS: usize = 32;

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the chat owner
    User,
    /// Reply produced by the completion backend
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParleyError;

    /// Parse a role name, ignoring case and surrounding whitespace
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::chat::Role;
    ///
    /// assert_eq!("user".parse::<Role>().unwrap(), Role::User);
    /// assert_eq!(" Assistant ".parse::<Role>().unwrap(), Role::Assistant);
    /// assert!("system".parse::<Role>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParleyError::Validation(format!(
                "unsupported role: {}",
                other
            ))),
        }
    }
}

/// One entry of a chat's message log
///
/// Messages are immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Author of the message
    pub role: Role,
    /// Raw message text
    pub content: String,
    /// When the message was stored (UTC)
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current UTC time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Listing record of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    /// Server-generated identifier, never reused
    pub id: String,
    /// Display title, see [`derive_title`]
    pub title: String,
    /// Last time the chat was touched (UTC)
    pub updated_at: DateTime<Utc>,
}

impl ChatSummary {
    /// Whether the title is still the placeholder set at creation
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// A chat's summary together with its complete message log, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatView {
    pub summary: ChatSummary,
    pub messages: Vec<Message>,
}

/// Derive a chat title from message content
///
/// Returns `None` when the content is blank. Otherwise the trimmed content
/// is cut at [`TITLE_MAX_CHARS`] characters with no regard for word
/// boundaries.
///
/// # Examples
///
/// ```
/// use parley::chat::derive_title;
///
/// assert_eq!(derive_title("  hi there  ").as_deref(), Some("hi there"));
/// assert_eq!(
///     derive_title("hello there, how are you today friend").as_deref(),
///     Some("hello there, how are you today f")
/// );
/// assert!(derive_title(" \n\t ").is_none());
/// ```
pub fn derive_title(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(TITLE_MAX_CHARS).collect())
}
