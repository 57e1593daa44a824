pub mod client;
pub mod entities;
pub mod error;

pub use client::{ApiClient, HttpApiClient};
pub use entities::{Bulletin, Conversation, Message, NewsItem, Page};
pub use error::ApiError;
