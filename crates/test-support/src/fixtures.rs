use chrono::{DateTime, Utc};
use rookery_api::{Bulletin, Conversation, Message, NewsItem, Page};
use rookery_core::{ChangeAction, ChangeEvent, SyncChannel};

pub fn timestamp(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap_or_else(|error| panic!("invalid fixture timestamp {rfc3339}: {error}"))
        .with_timezone(&Utc)
}

pub fn conversation(id: i64, last_message_at: &str) -> Conversation {
    Conversation {
        id,
        title: format!("Conversation {id}"),
        last_message_preview: None,
        last_message_at: timestamp(last_message_at),
        unread_count: 0,
    }
}

pub fn message(id: i64, conversation_id: i64, body: &str) -> Message {
    Message {
        id,
        conversation_id,
        sender_id: 1,
        body: body.to_string(),
        sent_at: timestamp("2026-03-01T10:00:00Z"),
        edited: false,
        like_count: 0,
    }
}

pub fn bulletin(id: i64, title: &str) -> Bulletin {
    Bulletin {
        id,
        title: title.to_string(),
        body: String::new(),
        posted_at: timestamp("2026-03-01T09:00:00Z"),
        read: false,
    }
}

pub fn news_item(id: i64, title: &str) -> NewsItem {
    NewsItem {
        id,
        title: title.to_string(),
        summary: None,
        link: None,
        published_at: timestamp("2026-03-01T08:00:00Z"),
    }
}

pub fn page<T>(items: Vec<T>, page: u32, total_pages: u32) -> Page<T> {
    Page {
        items,
        page,
        total_pages,
        per_page: 25,
    }
}

/// A change notification with only the channel and action set; tests
/// fill in the identifying fields with struct update syntax.
pub fn change(channel: SyncChannel, action: ChangeAction) -> ChangeEvent {
    ChangeEvent {
        channel,
        action,
        secondary_action: None,
        actor_user_id: None,
        conversation_id: None,
        message_id: None,
        entity_id: None,
        is_typing: None,
    }
}
