pub mod config;
pub mod error;
pub mod event;
pub mod profile;

pub use config::{ApiConfig, Config, ConfigError, FeedSettings, RouterSettings, SyncSettings};
pub use error::RouterError;
pub use event::{
    BroadcastRouter, ChangeAction, ChangeEvent, ChangeRouter, ChannelFilter, RouterSubscription,
    SecondaryAction, SyncChannel,
};
pub use profile::{Profile, ProfileField, ProfileStore};
