use chrono::{DateTime, Utc};
use shared::{domain::UserId, protocol::ChatMessage};

/// A chat message shaped for display from one viewer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub is_own: bool,
    pub author: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

pub fn chat_line(message: &ChatMessage, viewer: UserId) -> ChatLine {
    let is_own = message.sender_id == viewer;
    let author = if is_own {
        "You".to_string()
    } else {
        message
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user #{}", message.sender_id))
    };

    ChatLine {
        is_own,
        author,
        body: message.content.clone(),
        sent_at: message.sent_at,
    }
}

/// Oldest first, as a transcript reads.
pub fn chat_transcript(messages: &[ChatMessage], viewer: UserId) -> Vec<ChatLine> {
    let mut ordered: Vec<&ChatMessage> = messages.iter().collect();
    ordered.sort_by_key(|message| (message.sent_at, message.id.0));
    ordered
        .into_iter()
        .map(|message| chat_line(message, viewer))
        .collect()
}
