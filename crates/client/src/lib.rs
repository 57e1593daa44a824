pub mod client;
pub mod error;

pub use client::{DefaultSyncClient, SyncClient};
pub use error::ClientError;
