use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters of the first message used as an archived chat title.
pub const TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A finished conversation moved into the session archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub archived_at: DateTime<Utc>,
}

impl Conversation {
    /// Archive the given messages. The title is the leading substring of the
    /// first message; the timestamp is the archival time.
    pub fn archive(messages: Vec<Message>) -> Self {
        let title = messages
            .first()
            .map(|m| m.content.chars().take(TITLE_CHARS).collect())
            .unwrap_or_else(|| "Untitled".to_string());

        Self {
            id: Uuid::new_v4().to_string(),
            title,
            messages,
            archived_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListItem {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub archived_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationListItem {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            message_count: conversation.messages.len(),
            archived_at: conversation.archived_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_title_is_leading_substring_of_first_message() {
        let long = "a".repeat(100);
        let conversation = Conversation::archive(vec![Message::user(long)]);
        assert_eq!(conversation.title.chars().count(), TITLE_CHARS);
    }

    #[test]
    fn archive_title_keeps_short_first_message_whole() {
        let conversation = Conversation::archive(vec![
            Message::user("What is Rust?"),
            Message::assistant("A systems language."),
        ]);
        assert_eq!(conversation.title, "What is Rust?");
        assert_eq!(conversation.messages.len(), 2);
    }

    #[test]
    fn list_item_carries_message_count() {
        let conversation = Conversation::archive(vec![
            Message::user("hi"),
            Message::assistant("hello"),
        ]);
        let item = ConversationListItem::from(&conversation);
        assert_eq!(item.message_count, 2);
        assert_eq!(item.id, conversation.id);
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
