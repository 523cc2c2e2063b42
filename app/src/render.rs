use chrono::NaiveDateTime;
use ragchat_core::{Conversation, ConversationMemory, MessageType, Session};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

fn timestamp(value: Option<NaiveDateTime>) -> String {
    value
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_owned())
}

pub fn conversation_line(conversation: &Conversation) -> String {
    format!(
        "{}  {}  (last active {})",
        conversation.id,
        conversation.title,
        timestamp(conversation.last_activity)
    )
}

pub fn transcript(memory: &ConversationMemory) -> String {
    memory
        .messages
        .iter()
        .map(|message| {
            let speaker = match message.message_type {
                MessageType::User => "you",
                MessageType::Assistant => "assistant",
                MessageType::System => "system",
            };
            format!("[{}] {speaker}: {}", timestamp(message.timestamp), message.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn session_summary(session: &Session) -> String {
    if !session.is_authenticated() {
        return "not signed in".to_owned();
    }
    match session.user() {
        Some(user) => {
            let label = ["email", "name", "id"]
                .iter()
                .find_map(|field| user.get(field).filter(|v| !v.is_null()))
                .map(|v| v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| "unknown user".to_owned());
            format!("signed in as {label}")
        }
        None => "signed in (no user profile stored)".to_owned(),
    }
}
