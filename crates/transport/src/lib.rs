pub mod decoder;
pub mod error;
pub mod feed;
pub mod socket;

pub use decoder::decode_frame;
pub use error::{DecodeError, TransportError};
pub use feed::{ConnectionState, EventFeed};
pub use socket::{FeedConfig, FeedTransport, WebSocketTransport};
