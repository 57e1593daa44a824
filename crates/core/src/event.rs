use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entity family a change notification applies to.
///
/// Channels are a closed set; frames naming anything else fail to decode
/// and are dropped upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncChannel {
    Conversations,
    Messages,
    Bulletins,
    News,
}

impl SyncChannel {
    pub const ALL: [SyncChannel; 4] = [
        SyncChannel::Conversations,
        SyncChannel::Messages,
        SyncChannel::Bulletins,
        SyncChannel::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncChannel::Conversations => "conversations",
            SyncChannel::Messages => "messages",
            SyncChannel::Bulletins => "bulletins",
            SyncChannel::News => "news",
        }
    }
}

impl std::fmt::Display for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the entity (wire name `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Typing,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::Typing => "typing",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualifier refining an update (wire name `secondary_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryAction {
    Leave,
    Read,
    Liked,
    Unliked,
    Edit,
}

/// One server-pushed change notification, decoded from a feed frame.
///
/// Immutable once decoded; the router hands each subscriber its own copy.
/// Identifier fields are optional because the server populates only the
/// ones relevant to the channel: `conversation_id`/`message_id` for chat
/// traffic, `entity_id` for bulletins and news items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub channel: SyncChannel,

    #[serde(rename = "status")]
    pub action: ChangeAction,

    #[serde(
        rename = "secondary_status",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub secondary_action: Option<SecondaryAction>,

    /// User that caused the change (wire name `user_id`).
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,

    /// Whether the actor started or stopped typing (wire name `typing`).
    #[serde(rename = "typing", default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
}

impl ChangeEvent {
    /// Create an event with the required discriminators and no identifiers.
    pub fn new(channel: SyncChannel, action: ChangeAction) -> Self {
        Self {
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
}

/// Typed predicate deciding which channels a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    All,
    AnyOf(Vec<SyncChannel>),
}

impl ChannelFilter {
    pub fn only(channel: SyncChannel) -> Self {
        ChannelFilter::AnyOf(vec![channel])
    }

    pub fn matches(&self, channel: SyncChannel) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::AnyOf(channels) => channels.contains(&channel),
        }
    }
}

/// In-process fan-out of change events to registered subscribers.
///
/// `publish` is synchronous and never blocks: it enqueues the event into
/// the buffer of every subscription whose filter matches the channel, in
/// registration order. Delivery is best-effort; a subscriber that cannot
/// keep up overruns its own buffer and observes
/// [`RouterError::Lagged`](crate::error::RouterError) without affecting
/// anyone else. A subscription is revoked by dropping it, after which no
/// further deliveries can be observed through it.
pub trait ChangeRouter: Send + Sync {
    fn publish(&self, event: ChangeEvent);

    fn subscribe(&self, filter: ChannelFilter) -> RouterSubscription;
}

/// [`ChangeRouter`] backed by one bounded broadcast channel per
/// [`SyncChannel`].
#[derive(Clone)]
pub struct BroadcastRouter {
    conversations_sender: broadcast::Sender<ChangeEvent>,
    messages_sender: broadcast::Sender<ChangeEvent>,
    bulletins_sender: broadcast::Sender<ChangeEvent>,
    news_sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastRouter {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (conversations_sender, _) = broadcast::channel(capacity);
        let (messages_sender, _) = broadcast::channel(capacity);
        let (bulletins_sender, _) = broadcast::channel(capacity);
        let (news_sender, _) = broadcast::channel(capacity);

        Self {
            conversations_sender,
            messages_sender,
            bulletins_sender,
            news_sender,
        }
    }

    fn sender_for(&self, channel: SyncChannel) -> &broadcast::Sender<ChangeEvent> {
        match channel {
            SyncChannel::Conversations => &self.conversations_sender,
            SyncChannel::Messages => &self.messages_sender,
            SyncChannel::Bulletins => &self.bulletins_sender,
            SyncChannel::News => &self.news_sender,
        }
    }
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChangeRouter for BroadcastRouter {
    fn publish(&self, event: ChangeEvent) {
        // A send with no live receivers is fine; nobody cares about the
        // event and it is dropped.
        let _ = self.sender_for(event.channel).send(event);
    }

    fn subscribe(&self, filter: ChannelFilter) -> RouterSubscription {
        let receiver_for = |channel: SyncChannel| {
            filter
                .matches(channel)
                .then(|| self.sender_for(channel).subscribe())
        };

        RouterSubscription {
            conversations: receiver_for(SyncChannel::Conversations),
            messages: receiver_for(SyncChannel::Messages),
            bulletins: receiver_for(SyncChannel::Bulletins),
            news: receiver_for(SyncChannel::News),
        }
    }
}

/// Handle through which a subscriber consumes its matched events.
///
/// Dropping the subscription revokes it.
pub struct RouterSubscription {
    conversations: Option<broadcast::Receiver<ChangeEvent>>,
    messages: Option<broadcast::Receiver<ChangeEvent>>,
    bulletins: Option<broadcast::Receiver<ChangeEvent>>,
    news: Option<broadcast::Receiver<ChangeEvent>>,
}

impl RouterSubscription {
    /// Wait for the next event on any of the subscribed channels.
    ///
    /// Events on one channel arrive in publish order. `ChannelClosed`
    /// means the router side is gone and the consuming loop should end.
    pub async fn recv(&mut self) -> Result<ChangeEvent, crate::error::RouterError> {
        let conversations = self.conversations.as_mut();
        let messages = self.messages.as_mut();
        let bulletins = self.bulletins.as_mut();
        let news = self.news.as_mut();

        let received = tokio::select! {
            result = recv_from_channel(conversations) => result,
            result = recv_from_channel(messages) => result,
            result = recv_from_channel(bulletins) => result,
            result = recv_from_channel(news) => result,
        };

        match received {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Closed) => {
                Err(crate::error::RouterError::ChannelClosed)
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Err(crate::error::RouterError::Lagged(count))
            }
        }
    }
}

async fn recv_from_channel(
    receiver: Option<&mut broadcast::Receiver<ChangeEvent>>,
) -> Result<ChangeEvent, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
