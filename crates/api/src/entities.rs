use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chat thread as shown in the conversations list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    /// Timestamp of the latest activity; the list sort key. Second
    /// granularity on the wire, so ties are common.
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
}

/// One message inside a conversation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub like_count: u32,
}

/// Community announcement posted by staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bulletin {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Editorial news feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// One page of a list endpoint's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
    pub per_page: u32,
}
