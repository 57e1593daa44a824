use std::sync::Arc;

use rookery_api::{ApiClient, Bulletin};
use rookery_core::{
    ChangeAction, ChangeEvent, ChangeRouter, ChannelFilter, RouterError, SyncChannel,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::store::{CollectionSnapshot, CollectionStore};

/// Keeps the bulletin board reconciled against feed notifications.
pub struct BulletinSync<A: ApiClient> {
    api: Arc<A>,
    router: Arc<dyn ChangeRouter>,
    store: CollectionStore<Bulletin>,
    page_size: u32,
}

impl<A: ApiClient> BulletinSync<A> {
    pub fn new(api: Arc<A>, router: Arc<dyn ChangeRouter>, page_size: u32) -> Self {
        Self {
            api,
            router,
            store: CollectionStore::new(|bulletin| bulletin.id),
            page_size,
        }
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<Bulletin> {
        self.store.snapshot().await
    }

    pub async fn bulletins(&self) -> Vec<Bulletin> {
        self.store.entries().await
    }

    pub async fn new_items_available(&self) -> bool {
        self.store.new_items_available().await
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.store.watch_revision()
    }

    pub async fn refresh(&self, reset: bool) -> Result<(), SyncError> {
        let Some(_refresh) = self.store.try_begin_refresh() else {
            debug!("bulletin refresh already in flight");
            return Ok(());
        };
        let Some(page) = self.store.next_page(reset).await else {
            debug!("bulletin board fully paged");
            return Ok(());
        };

        let fetched = self.api.list_bulletins(page, self.page_size).await?;
        self.store.apply_page(fetched, reset).await;
        Ok(())
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    /// Consume bulletin change notifications until the router closes.
    pub async fn run(self: Arc<Self>) -> Result<(), SyncError> {
        let mut subscription = self
            .router
            .subscribe(ChannelFilter::only(SyncChannel::Bulletins));

        loop {
            match subscription.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RouterError::Lagged(missed)) => {
                    warn!(missed, "bulletin subscription lagged; board may be stale");
                    self.store.flag_new_items().await;
                }
                Err(RouterError::ChannelClosed) => {
                    debug!("change router closed; bulletin sync ending");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&self, event: ChangeEvent) {
        match event.action {
            ChangeAction::Delete => {
                if let Some(bulletin_id) = event.entity_id
                    && self.store.remove(bulletin_id).await
                {
                    debug!(bulletin_id, "bulletin removed");
                }
            }
            ChangeAction::Create | ChangeAction::Update => match event.entity_id {
                Some(bulletin_id) => self.reconcile(bulletin_id).await,
                None if event.action == ChangeAction::Create => {
                    self.store.flag_new_items().await;
                }
                None => {}
            },
            ChangeAction::Typing => {}
        }
    }

    async fn reconcile(&self, bulletin_id: i64) {
        match self.api.get_bulletin(bulletin_id).await {
            Ok(bulletin) => {
                self.store.upsert(bulletin).await;
            }
            Err(error) if error.is_not_found() => {
                self.store.remove(bulletin_id).await;
                debug!(bulletin_id, "bulletin gone upstream; removed locally");
            }
            Err(error) => {
                warn!(bulletin_id, %error, "bulletin re-fetch failed; keeping local copy");
            }
        }
    }
}
