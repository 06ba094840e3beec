//! Backing store key layout
//!
//! | key                   | kind   | contents                          |
//! |-----------------------|--------|-----------------------------------|
//! | `userchats:{user}`    | list   | chat ids, most recently touched first |
//! | `chatmeta:{id}`       | scalar | JSON [`ChatSummary`](super::ChatSummary) |
//! | `chatmessages:{id}`   | list   | JSON [`Message`](super::Message)s in append order |
//! | `chatowner:{id}`      | scalar | owning user identity              |

/// Index of a user's chats
pub fn user_chats(user: &str) -> String {
    format!("userchats:{}", user)
}

/// Summary record of a chat
pub fn chat_meta(chat_id: &str) -> String {
    format!("chatmeta:{}", chat_id)
}

/// Message log of a chat
pub fn chat_messages(chat_id: &str) -> String {
    format!("chatmessages:{}", chat_id)
}

/// Ownership record of a chat
pub fn chat_owner(chat_id: &str) -> String {
    format!("chatowner:{}", chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_families() {
        assert_eq!(user_chats("ana@example.com"), "userchats:ana@example.com");
        assert_eq!(chat_meta("42"), "chatmeta:42");
        assert_eq!(chat_messages("42"), "chatmessages:42");
        assert_eq!(chat_owner("42"), "chatowner:42");
    }
}
