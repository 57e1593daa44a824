use std::sync::Arc;
use std::time::Duration;

use rookery_api::{ApiClient, HttpApiClient};
use rookery_core::{BroadcastRouter, ChangeRouter, Config, ProfileStore};
use rookery_sync::{
    BulletinSync, ConversationSync, EngineSet, MessageSync, NewsSync, SyncCoordinator,
};
use rookery_transport::{ConnectionState, EventFeed, FeedTransport, WebSocketTransport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::ClientError;

/// Fully wired sync layer for one signed-in account at a time.
///
/// Owns the router, the profile store, the event feed, and the four
/// collection engines, and runs their loops as background tasks. The
/// embedding application signs in and out through [`SyncClient::profile`]
/// and reads collections through the engine handles.
pub struct SyncClient<A: ApiClient = HttpApiClient, T: FeedTransport = WebSocketTransport> {
    config: Config,
    profile: Arc<ProfileStore>,
    router: Arc<BroadcastRouter>,
    api: Arc<A>,
    feed: Arc<EventFeed<T>>,
    engines: EngineSet<A>,
    coordinator: Arc<SyncCoordinator<A, T>>,
    tasks: Vec<JoinHandle<()>>,
}

/// The production wiring: HTTPS REST client and WebSocket feed.
pub type DefaultSyncClient = SyncClient;

impl SyncClient {
    pub fn new(config: Config) -> Result<Self, ClientError> {
        config.validate()?;
        let api = Arc::new(HttpApiClient::new(
            config.api.base_url.clone(),
            config.api.key.clone(),
            Duration::from_secs(config.api.request_timeout_seconds),
        )?);
        Ok(Self::assemble(config, api))
    }
}

impl<A: ApiClient + 'static, T: FeedTransport> SyncClient<A, T> {
    /// Wire a client around an existing API implementation.
    pub fn with_api(config: Config, api: Arc<A>) -> Self {
        Self::assemble(config, api)
    }

    fn assemble(config: Config, api: Arc<A>) -> Self {
        let profile = Arc::new(ProfileStore::default());
        let router = Arc::new(BroadcastRouter::new(config.router.channel_capacity));
        let router_handle: Arc<dyn ChangeRouter> = router.clone();
        let feed = Arc::new(EventFeed::<T>::new(router_handle.clone()));

        let page_size = config.sync.page_size;
        let engines = EngineSet {
            conversations: Arc::new(ConversationSync::new(
                Arc::clone(&api),
                router_handle.clone(),
                page_size,
            )),
            messages: Arc::new(MessageSync::new(
                Arc::clone(&api),
                router_handle.clone(),
                page_size,
            )),
            bulletins: Arc::new(BulletinSync::new(
                Arc::clone(&api),
                router_handle.clone(),
                page_size,
            )),
            news: Arc::new(NewsSync::new(Arc::clone(&api), router_handle, page_size)),
        };
        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            Arc::clone(&profile),
            Arc::clone(&api),
            Arc::clone(&feed),
            engines.clone(),
        ));

        Self {
            config,
            profile,
            router,
            api,
            feed,
            engines,
            coordinator,
            tasks: Vec::new(),
        }
    }

    /// Spawn the background loops. Call once, inside a Tokio runtime;
    /// repeated calls are ignored.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            debug!("sync client already started");
            return;
        }

        self.tasks = vec![
            spawn_component_task("event-feed", Arc::clone(&self.feed).run()),
            spawn_component_task(
                "conversation-sync",
                Arc::clone(&self.engines.conversations).run(),
            ),
            spawn_component_task("message-sync", Arc::clone(&self.engines.messages).run()),
            spawn_component_task("bulletin-sync", Arc::clone(&self.engines.bulletins).run()),
            spawn_component_task("news-sync", Arc::clone(&self.engines.news).run()),
            spawn_component_task("session-coordinator", Arc::clone(&self.coordinator).run()),
        ];
    }

    /// Close the feed connection and stop every background task.
    pub async fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        if self.feed.status() != ConnectionState::Disconnected {
            self.feed.disconnect();
            let mut status = self.feed.watch_status();
            let _ = status
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn conversations(&self) -> &Arc<ConversationSync<A>> {
        &self.engines.conversations
    }

    pub fn messages(&self) -> &Arc<MessageSync<A>> {
        &self.engines.messages
    }

    pub fn bulletins(&self) -> &Arc<BulletinSync<A>> {
        &self.engines.bulletins
    }

    pub fn news(&self) -> &Arc<NewsSync<A>> {
        &self.engines.news
    }

    pub fn feed_status(&self) -> ConnectionState {
        self.feed.status()
    }

    pub fn watch_feed_status(&self) -> watch::Receiver<ConnectionState> {
        self.feed.watch_status()
    }
}

fn spawn_component_task<F, E>(component: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display,
{
    tokio::spawn(async move {
        if let Err(error) = task.await {
            let reason = error.to_string();
            error!(component, %reason, "component task terminated");
        }
    })
}
