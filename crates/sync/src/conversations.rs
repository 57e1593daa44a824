use std::sync::Arc;

use rookery_api::{ApiClient, Conversation};
use rookery_core::{
    ChangeAction, ChangeEvent, ChangeRouter, ChannelFilter, RouterError, SyncChannel,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::store::{CollectionSnapshot, CollectionStore};

/// Keeps the conversation list reconciled against feed notifications.
///
/// The list stays ordered by most recent activity, newest first; rows
/// with equal timestamps keep their relative order.
pub struct ConversationSync<A: ApiClient> {
    api: Arc<A>,
    router: Arc<dyn ChangeRouter>,
    store: CollectionStore<Conversation>,
    page_size: u32,
}

impl<A: ApiClient> ConversationSync<A> {
    pub fn new(api: Arc<A>, router: Arc<dyn ChangeRouter>, page_size: u32) -> Self {
        Self {
            api,
            router,
            store: CollectionStore::with_order(
                |conversation| conversation.id,
                order_by_recent_activity,
            ),
            page_size,
        }
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<Conversation> {
        self.store.snapshot().await
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.entries().await
    }

    /// Whether a conversation was created that the local list has not
    /// seen yet. Retired by the next reset refresh.
    pub async fn new_items_available(&self) -> bool {
        self.store.new_items_available().await
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.store.watch_revision()
    }

    /// Fetch the first page again (`reset`) or the page after the last
    /// one fetched.
    ///
    /// Returns without a network call when a refresh is already in
    /// flight or every page has been fetched.
    pub async fn refresh(&self, reset: bool) -> Result<(), SyncError> {
        let Some(_refresh) = self.store.try_begin_refresh() else {
            debug!("conversation refresh already in flight");
            return Ok(());
        };
        let Some(page) = self.store.next_page(reset).await else {
            debug!("conversation list fully paged");
            return Ok(());
        };

        let fetched = self.api.list_conversations(page, self.page_size).await?;
        self.store.apply_page(fetched, reset).await;
        Ok(())
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    /// Consume conversation change notifications until the router closes.
    pub async fn run(self: Arc<Self>) -> Result<(), SyncError> {
        let mut subscription = self
            .router
            .subscribe(ChannelFilter::only(SyncChannel::Conversations));

        loop {
            match subscription.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RouterError::Lagged(missed)) => {
                    warn!(missed, "conversation subscription lagged; list may be stale");
                    self.store.flag_new_items().await;
                }
                Err(RouterError::ChannelClosed) => {
                    debug!("change router closed; conversation sync ending");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&self, event: ChangeEvent) {
        match event.action {
            ChangeAction::Delete => {
                if let Some(conversation_id) = event.conversation_id
                    && self.store.remove(conversation_id).await
                {
                    debug!(conversation_id, "conversation removed");
                }
            }
            ChangeAction::Create | ChangeAction::Update => match event.conversation_id {
                Some(conversation_id) => self.reconcile(conversation_id).await,
                None if event.action == ChangeAction::Create => {
                    self.store.flag_new_items().await;
                }
                None => {}
            },
            // Typing activity only matters to the active message view.
            ChangeAction::Typing => {}
        }
    }

    /// Re-fetch one conversation and fold the result in. A missing
    /// entity means it is gone upstream, any other failure keeps the
    /// local copy until the next refresh.
    async fn reconcile(&self, conversation_id: i64) {
        match self.api.get_conversation(conversation_id).await {
            Ok(conversation) => {
                self.store.upsert(conversation).await;
            }
            Err(error) if error.is_not_found() => {
                self.store.remove(conversation_id).await;
                debug!(conversation_id, "conversation gone upstream; removed locally");
            }
            Err(error) => {
                warn!(conversation_id, %error, "conversation re-fetch failed; keeping local copy");
            }
        }
    }
}

fn order_by_recent_activity(conversations: &mut Vec<Conversation>) {
    conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
