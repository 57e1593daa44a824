use std::sync::Arc;

use rookery_api::{ApiClient, Message};
use rookery_core::{
    ChangeAction, ChangeEvent, ChangeRouter, ChannelFilter, RouterError, SyncChannel,
};
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::store::{CollectionSnapshot, CollectionStore};

/// Transient typing activity inside the conversation being viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingIndicator {
    pub conversation_id: i64,
    pub user_id: Option<i64>,
}

/// Keeps the message history of the active conversation reconciled.
///
/// The collection is scoped to one conversation at a time; events for
/// any other conversation are ignored, and switching conversations
/// starts over from an empty list.
pub struct MessageSync<A: ApiClient> {
    api: Arc<A>,
    router: Arc<dyn ChangeRouter>,
    store: CollectionStore<Message>,
    scope: RwLock<Option<i64>>,
    typing: watch::Sender<Option<TypingIndicator>>,
    page_size: u32,
}

impl<A: ApiClient> MessageSync<A> {
    pub fn new(api: Arc<A>, router: Arc<dyn ChangeRouter>, page_size: u32) -> Self {
        let (typing, _) = watch::channel(None);
        Self {
            api,
            router,
            store: CollectionStore::new(|message| message.id),
            scope: RwLock::new(None),
            typing,
            page_size,
        }
    }

    pub async fn active_conversation(&self) -> Option<i64> {
        *self.scope.read().await
    }

    /// Point the engine at another conversation, or at none.
    ///
    /// Changing the scope drops the loaded history, the page cursor,
    /// and any typing indicator; the caller refreshes afterwards.
    pub async fn set_active_conversation(&self, conversation_id: Option<i64>) {
        {
            let mut scope = self.scope.write().await;
            if *scope == conversation_id {
                return;
            }
            *scope = conversation_id;
        }

        debug!(?conversation_id, "active conversation changed; message list reset");
        self.store.clear().await;
        self.typing.send_replace(None);
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<Message> {
        self.store.snapshot().await
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.store.entries().await
    }

    pub async fn new_items_available(&self) -> bool {
        self.store.new_items_available().await
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.store.watch_revision()
    }

    pub fn typing_indicator(&self) -> Option<TypingIndicator> {
        *self.typing.subscribe().borrow()
    }

    pub fn watch_typing(&self) -> watch::Receiver<Option<TypingIndicator>> {
        self.typing.subscribe()
    }

    /// Fetch the first page again (`reset`) or the page after the last
    /// one fetched, within the active conversation.
    ///
    /// A no-op without an active conversation, while a refresh is in
    /// flight, or once every page has been fetched.
    pub async fn refresh(&self, reset: bool) -> Result<(), SyncError> {
        let Some(conversation_id) = *self.scope.read().await else {
            debug!("no active conversation; message refresh skipped");
            return Ok(());
        };
        let Some(_refresh) = self.store.try_begin_refresh() else {
            debug!(conversation_id, "message refresh already in flight");
            return Ok(());
        };
        let Some(page) = self.store.next_page(reset).await else {
            debug!(conversation_id, "message history fully paged");
            return Ok(());
        };

        let fetched = self
            .api
            .list_messages(conversation_id, page, self.page_size)
            .await?;
        self.store.apply_page(fetched, reset).await;
        Ok(())
    }

    pub async fn clear(&self) {
        *self.scope.write().await = None;
        self.store.clear().await;
        self.typing.send_replace(None);
    }

    /// Consume message change notifications until the router closes.
    pub async fn run(self: Arc<Self>) -> Result<(), SyncError> {
        let mut subscription = self
            .router
            .subscribe(ChannelFilter::only(SyncChannel::Messages));

        loop {
            match subscription.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RouterError::Lagged(missed)) => {
                    warn!(missed, "message subscription lagged; history may be stale");
                    self.store.flag_new_items().await;
                }
                Err(RouterError::ChannelClosed) => {
                    debug!("change router closed; message sync ending");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&self, event: ChangeEvent) {
        // Message events are meaningless without a conversation, and
        // only the active conversation is mirrored locally.
        let Some(conversation_id) = event.conversation_id else {
            return;
        };
        if *self.scope.read().await != Some(conversation_id) {
            return;
        }

        match event.action {
            ChangeAction::Typing => {
                let indicator = (event.is_typing == Some(true)).then_some(TypingIndicator {
                    conversation_id,
                    user_id: event.actor_user_id,
                });
                self.typing.send_replace(indicator);
            }
            ChangeAction::Delete => {
                if let Some(message_id) = event.message_id
                    && self.store.remove(message_id).await
                {
                    debug!(conversation_id, message_id, "message removed");
                }
            }
            ChangeAction::Create | ChangeAction::Update => {
                if event.action == ChangeAction::Create {
                    // An arriving message supersedes the typing indicator.
                    self.typing.send_replace(None);
                }
                match event.message_id {
                    Some(message_id) => self.reconcile(conversation_id, message_id).await,
                    None if event.action == ChangeAction::Create => {
                        self.store.flag_new_items().await;
                    }
                    None => {}
                }
            }
        }
    }

    async fn reconcile(&self, conversation_id: i64, message_id: i64) {
        match self.api.get_message(conversation_id, message_id).await {
            Ok(message) => {
                self.store.upsert(message).await;
            }
            Err(error) if error.is_not_found() => {
                self.store.remove(message_id).await;
                debug!(conversation_id, message_id, "message gone upstream; removed locally");
            }
            Err(error) => {
                warn!(conversation_id, message_id, %error, "message re-fetch failed; keeping local copy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rookery_core::BroadcastRouter;
    use rookery_test_support::{ScriptedApi, fixtures};

    async fn harness() -> (
        Arc<MessageSync<ScriptedApi>>,
        Arc<ScriptedApi>,
        Arc<BroadcastRouter>,
    ) {
        let api = Arc::new(ScriptedApi::new());
        let router = Arc::new(BroadcastRouter::default());
        let sync = Arc::new(MessageSync::new(Arc::clone(&api), router.clone(), 25));
        tokio::spawn(Arc::clone(&sync).run());
        settle().await;
        (sync, api, router)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn listed_ids(sync: &MessageSync<ScriptedApi>) -> Vec<i64> {
        sync.messages().await.iter().map(|m| m.id).collect()
    }

    fn typing_event(conversation_id: i64, user_id: i64, is_typing: bool) -> ChangeEvent {
        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Typing);
        event.conversation_id = Some(conversation_id);
        event.actor_user_id = Some(user_id);
        event.is_typing = Some(is_typing);
        event
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refresh_loads_the_active_conversation() {
        let (sync, api, _router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![
                fixtures::message(40, 9, "first"),
                fixtures::message(41, 9, "second"),
            ],
            1,
            1,
        ));

        sync.refresh(true).await.expect("refresh should succeed");

        assert_eq!(listed_ids(&sync).await, vec![40, 41]);
        assert_eq!(api.message_scopes(), vec![9]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refresh_without_an_active_conversation_is_inert() {
        let (sync, api, _router) = harness().await;

        sync.refresh(true).await.expect("refresh without scope");

        assert!(api.messages.list_requests().is_empty());
        assert!(listed_ids(&sync).await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ignores_events_for_other_conversations() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;

        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Create);
        event.conversation_id = Some(8);
        event.message_id = Some(70);
        router.publish(event);
        router.publish(typing_event(8, 2, true));
        settle().await;

        assert!(listed_ids(&sync).await.is_empty());
        assert!(api.messages.get_requests().is_empty());
        assert!(!sync.new_items_available().await);
        assert_eq!(sync.typing_indicator(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn in_scope_create_refetches_and_clears_typing() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.insert(40, fixtures::message(40, 9, "hello"));

        router.publish(typing_event(9, 2, true));
        settle().await;
        assert_eq!(
            sync.typing_indicator(),
            Some(TypingIndicator {
                conversation_id: 9,
                user_id: Some(2),
            })
        );

        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Create);
        event.conversation_id = Some(9);
        event.message_id = Some(40);
        router.publish(event);
        settle().await;

        assert_eq!(listed_ids(&sync).await, vec![40]);
        assert_eq!(api.messages.get_requests(), vec![40]);
        assert_eq!(sync.typing_indicator(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn typing_stop_clears_the_indicator() {
        let (sync, _api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;

        router.publish(typing_event(9, 2, true));
        settle().await;
        assert!(sync.typing_indicator().is_some());

        router.publish(typing_event(9, 2, false));
        settle().await;
        assert_eq!(sync.typing_indicator(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_event_removes_the_message() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![
                fixtures::message(40, 9, "first"),
                fixtures::message(41, 9, "second"),
            ],
            1,
            1,
        ));
        sync.refresh(true).await.expect("seed refresh");

        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Delete);
        event.conversation_id = Some(9);
        event.message_id = Some(40);
        router.publish(event);
        settle().await;

        assert_eq!(listed_ids(&sync).await, vec![41]);
        assert!(api.messages.get_requests().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_message_on_refetch_removes_it() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![fixtures::message(40, 9, "first")],
            1,
            1,
        ));
        sync.refresh(true).await.expect("seed refresh");

        // Nothing scripted for id 40 anymore, so the re-fetch 404s.
        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Update);
        event.conversation_id = Some(9);
        event.message_id = Some(40);
        router.publish(event);
        settle().await;

        assert!(listed_ids(&sync).await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_without_message_id_flags_new_messages() {
        let (sync, _api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;

        let mut event = fixtures::change(SyncChannel::Messages, ChangeAction::Create);
        event.conversation_id = Some(9);
        router.publish(event);
        settle().await;

        assert!(sync.new_items_available().await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn switching_conversations_starts_over() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![fixtures::message(40, 9, "first")],
            1,
            2,
        ));
        sync.refresh(true).await.expect("seed refresh");
        router.publish(typing_event(9, 2, true));
        settle().await;
        assert!(sync.typing_indicator().is_some());

        sync.set_active_conversation(Some(10)).await;

        assert!(listed_ids(&sync).await.is_empty());
        assert_eq!(sync.typing_indicator(), None);
        assert_eq!(sync.active_conversation().await, Some(10));

        // The cursor starts over too: the next forward fetch asks for
        // page 1 of the new conversation.
        sync.refresh(false).await.expect("refresh new conversation");
        assert_eq!(api.messages.list_requests(), vec![(1, 25), (1, 25)]);
        assert_eq!(api.message_scopes(), vec![9, 10]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reassigning_the_same_conversation_keeps_state() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![fixtures::message(40, 9, "first")],
            1,
            1,
        ));
        sync.refresh(true).await.expect("seed refresh");
        router.publish(typing_event(9, 2, true));
        settle().await;

        sync.set_active_conversation(Some(9)).await;

        assert_eq!(listed_ids(&sync).await, vec![40]);
        assert!(sync.typing_indicator().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn clear_drops_scope_history_and_typing() {
        let (sync, api, router) = harness().await;
        sync.set_active_conversation(Some(9)).await;
        api.messages.push_page(fixtures::page(
            vec![fixtures::message(40, 9, "first")],
            1,
            1,
        ));
        sync.refresh(true).await.expect("seed refresh");
        router.publish(typing_event(9, 2, true));
        settle().await;

        sync.clear().await;

        assert_eq!(sync.active_conversation().await, None);
        assert!(listed_ids(&sync).await.is_empty());
        assert_eq!(sync.typing_indicator(), None);
    }
}
