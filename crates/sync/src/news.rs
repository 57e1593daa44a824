use std::sync::Arc;

use rookery_api::{ApiClient, NewsItem};
use rookery_core::{
    ChangeAction, ChangeEvent, ChangeRouter, ChannelFilter, RouterError, SyncChannel,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::store::{CollectionSnapshot, CollectionStore};

/// Keeps the news feed reconciled against feed notifications.
pub struct NewsSync<A: ApiClient> {
    api: Arc<A>,
    router: Arc<dyn ChangeRouter>,
    store: CollectionStore<NewsItem>,
    page_size: u32,
}

impl<A: ApiClient> NewsSync<A> {
    pub fn new(api: Arc<A>, router: Arc<dyn ChangeRouter>, page_size: u32) -> Self {
        Self {
            api,
            router,
            store: CollectionStore::new(|item| item.id),
            page_size,
        }
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<NewsItem> {
        self.store.snapshot().await
    }

    pub async fn news(&self) -> Vec<NewsItem> {
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
            debug!("news refresh already in flight");
            return Ok(());
        };
        let Some(page) = self.store.next_page(reset).await else {
            debug!("news feed fully paged");
            return Ok(());
        };

        let fetched = self.api.list_news(page, self.page_size).await?;
        self.store.apply_page(fetched, reset).await;
        Ok(())
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    /// Consume news change notifications until the router closes.
    pub async fn run(self: Arc<Self>) -> Result<(), SyncError> {
        let mut subscription = self.router.subscribe(ChannelFilter::only(SyncChannel::News));

        loop {
            match subscription.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RouterError::Lagged(missed)) => {
                    warn!(missed, "news subscription lagged; feed may be stale");
                    self.store.flag_new_items().await;
                }
                Err(RouterError::ChannelClosed) => {
                    debug!("change router closed; news sync ending");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&self, event: ChangeEvent) {
        match event.action {
            ChangeAction::Delete => {
                if let Some(news_item_id) = event.entity_id
                    && self.store.remove(news_item_id).await
                {
                    debug!(news_item_id, "news item removed");
                }
            }
            ChangeAction::Create | ChangeAction::Update => match event.entity_id {
                Some(news_item_id) => self.reconcile(news_item_id).await,
                None if event.action == ChangeAction::Create => {
                    self.store.flag_new_items().await;
                }
                None => {}
            },
            ChangeAction::Typing => {}
        }
    }

    async fn reconcile(&self, news_item_id: i64) {
        match self.api.get_news_item(news_item_id).await {
            Ok(item) => {
                self.store.upsert(item).await;
            }
            Err(error) if error.is_not_found() => {
                self.store.remove(news_item_id).await;
                debug!(news_item_id, "news item gone upstream; removed locally");
            }
            Err(error) => {
                warn!(news_item_id, %error, "news re-fetch failed; keeping local copy");
            }
        }
    }
}
