use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PLACEHOLDER_TITLE: &str = "New Chat";
pub const PLACEHOLDER_USER_ID: &str = "placeholder-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "assistant")]
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    // client-side only, the server never sets it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_title_generating: bool,
}

impl Conversation {
    /// Placeholder inserted into the cache before the server confirms the
    /// conversation. Carries a fresh client-side id.
    pub fn placeholder(user_id: &str) -> Self {
        Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: Utc::now(),
            is_title_generating: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub conversation_id: String,
}

impl ChatMessage {
    pub fn user(conversation_id: &str, user_id: &str, content: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: Sender::User,
            content: content.into(),
            created_at: Utc::now(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Empty assistant message whose id is allocated ahead of the streamed
    /// content.
    pub fn pending_assistant(conversation_id: &str, user_id: &str) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: Sender::Ai,
            content: String::new(),
            created_at: Utc::now(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NewConversation<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

// empty payload touches the conversation (last activity) without changes
#[derive(Debug, Default, Serialize)]
pub struct UpdateConversation<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [ChatMessage],
}

/// Body returned by the completion endpoint on a non-success status.
#[derive(Debug, Default, Deserialize)]
pub struct ResponsePayload {
    pub content: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_names() {
        let message = ChatMessage::user("c1", "u1", "Hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["sender"], "user");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["conversationId"], "c1");
        assert!(value.get("created_at").is_some());
    }

    #[test]
    fn test_assistant_alias() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "sender": "assistant",
            "content": "hi",
            "created_at": "2024-05-01T10:00:00Z",
            "userId": "u1",
            "conversationId": "c1",
        }))
        .unwrap();
        assert_eq!(message.sender, Sender::Ai);
    }

    #[test]
    fn test_conversation_flag_defaults_off() {
        let conversation: Conversation = serde_json::from_value(json!({
            "id": "c1",
            "userId": "u1",
            "title": "Greeting",
            "created_at": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert!(!conversation.is_title_generating);

        let placeholder = Conversation::placeholder("u1");
        assert_eq!(placeholder.title, PLACEHOLDER_TITLE);
        assert!(placeholder.is_title_generating);
        let value = serde_json::to_value(&placeholder).unwrap();
        assert_eq!(value["isTitleGenerating"], true);
    }

    #[test]
    fn test_touch_payload_is_empty_object() {
        let body = serde_json::to_value(UpdateConversation::default()).unwrap();
        assert_eq!(body, json!({}));
    }
}
