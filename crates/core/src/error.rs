use thiserror::Error;

/// Errors observed by a router subscription while consuming events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("router closed")]
    ChannelClosed,

    #[error("subscriber lagged: {0} events missed")]
    Lagged(u64),
}
