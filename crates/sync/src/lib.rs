pub mod bulletins;
pub mod conversations;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod messages;
pub mod news;
pub mod store;

pub use bulletins::BulletinSync;
pub use conversations::ConversationSync;
pub use coordinator::{EngineSet, SyncCoordinator};
pub use cursor::PageCursor;
pub use error::SyncError;
pub use messages::{MessageSync, TypingIndicator};
pub use news::NewsSync;
pub use store::{CollectionSnapshot, CollectionStore};
