use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::format::format_message;
use crate::session::{Role, Session};

pub const PREVIEW_CHARS: usize = 50;
pub const NO_MESSAGES: &str = "No hay mensajes";
const ELLIPSIS: &str = "...";
const NO_TIME: &str = "--:--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub topic: String,
    pub date: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBubble {
    pub role: Role,
    pub html: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub session_id: String,
    pub topic: String,
    pub started: String,
    pub messages: Vec<MessageBubble>,
}

/// Newest first. Undated sessions go last; equal keys keep their input order.
pub fn sorted_by_recency(sessions: &[Session]) -> Vec<&Session> {
    let mut out: Vec<&Session> = sessions.iter().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out
}

pub fn preview_of(session: &Session) -> String {
    let Some(last) = session.history.last() else {
        return NO_MESSAGES.to_string();
    };
    let mut chars = last.content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}{ELLIPSIS}")
    } else {
        head
    }
}

pub fn list_items(sessions: &[Session]) -> Vec<SessionListItem> {
    sorted_by_recency(sessions)
        .into_iter()
        .map(|s| SessionListItem {
            id: s.id.clone(),
            topic: s.topic_label().to_string(),
            date: s.created_at.map(display_date).unwrap_or_default(),
            preview: preview_of(s),
        })
        .collect()
}

/// Case-insensitive match on topic or preview. An empty term keeps everything.
pub fn filter_by_search(items: &[SessionListItem], term: &str) -> Vec<SessionListItem> {
    let needle = term.to_lowercase();
    items
        .iter()
        .filter(|item| {
            needle.is_empty()
                || item.topic.to_lowercase().contains(&needle)
                || item.preview.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// Conversation panel for one session. System messages are not shown.
pub fn conversation_view(session: &Session) -> ConversationView {
    let messages = session
        .history
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| MessageBubble {
            role: m.role,
            html: format_message(&m.content),
            time: m
                .timestamp
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| NO_TIME.to_string()),
        })
        .collect();
    ConversationView {
        session_id: session.id.clone(),
        topic: session.topic_label().to_string(),
        started: session
            .created_at
            .map(|d| format!("Iniciada el {}", display_date(d)))
            .unwrap_or_default(),
        messages,
    }
}

fn display_date(d: DateTime<Utc>) -> String {
    d.format("%d/%m/%Y").to_string()
}
