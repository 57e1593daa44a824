use std::sync::Arc;

use rookery_api::ApiClient;
use rookery_core::{Config, FeedSettings, ProfileField, ProfileStore};
use rookery_transport::{EventFeed, FeedConfig, FeedTransport};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bulletins::BulletinSync;
use crate::conversations::ConversationSync;
use crate::error::SyncError;
use crate::messages::MessageSync;
use crate::news::NewsSync;

/// The four per-family engines behind one clearing boundary.
pub struct EngineSet<A: ApiClient> {
    pub conversations: Arc<ConversationSync<A>>,
    pub messages: Arc<MessageSync<A>>,
    pub bulletins: Arc<BulletinSync<A>>,
    pub news: Arc<NewsSync<A>>,
}

impl<A: ApiClient> EngineSet<A> {
    pub async fn clear_all(&self) {
        self.conversations.clear().await;
        self.messages.clear().await;
        self.bulletins.clear().await;
        self.news.clear().await;
    }
}

impl<A: ApiClient> Clone for EngineSet<A> {
    fn clone(&self) -> Self {
        Self {
            conversations: Arc::clone(&self.conversations),
            messages: Arc::clone(&self.messages),
            bulletins: Arc::clone(&self.bulletins),
            news: Arc::clone(&self.news),
        }
    }
}

/// Ties the session token to everything that depends on it.
///
/// A token appearing opens the feed connection and authenticates the
/// REST client; the token going away closes the connection and drops
/// every locally mirrored collection. A rotated token reconnects so the
/// feed handshake carries the current credentials.
pub struct SyncCoordinator<A: ApiClient, T: FeedTransport> {
    profile: Arc<ProfileStore>,
    api: Arc<A>,
    feed: Arc<EventFeed<T>>,
    engines: EngineSet<A>,
    feed_settings: FeedSettings,
    api_key: String,
}

impl<A: ApiClient, T: FeedTransport> SyncCoordinator<A, T> {
    pub fn new(
        config: &Config,
        profile: Arc<ProfileStore>,
        api: Arc<A>,
        feed: Arc<EventFeed<T>>,
        engines: EngineSet<A>,
    ) -> Self {
        Self {
            profile,
            api,
            feed,
            engines,
            feed_settings: config.feed.clone(),
            api_key: config.api.key.clone(),
        }
    }

    /// Follow profile changes until the profile store closes.
    pub async fn run(self: Arc<Self>) -> Result<(), SyncError> {
        let mut changes = self.profile.subscribe();
        // Catch up with a token set before this loop started; later
        // edges arrive as change notifications.
        let mut last_token = String::new();
        self.reconcile_session(&mut last_token).await;

        loop {
            match changes.recv().await {
                Ok(ProfileField::SessionToken) => {
                    self.reconcile_session(&mut last_token).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "profile changes lagged; re-checking the session");
                    self.reconcile_session(&mut last_token).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("profile store closed; session coordinator ending");
                    return Ok(());
                }
            }
        }
    }

    async fn reconcile_session(&self, last_token: &mut String) {
        let token = self.profile.session_token().await;
        if token == *last_token {
            return;
        }
        let was_signed_in = !last_token.is_empty();
        *last_token = token.clone();

        if token.is_empty() {
            info!("session closed; disconnecting feed and clearing collections");
            self.feed.disconnect();
            self.api.set_session_token(String::new()).await;
            self.engines.clear_all().await;
            return;
        }

        self.api.set_session_token(token.clone()).await;
        if was_signed_in {
            debug!("session token rotated; reconnecting feed");
            self.feed.disconnect();
        } else {
            info!("session opened; connecting feed");
        }
        self.feed.connect(self.feed_config(token));
    }

    fn feed_config(&self, session_token: String) -> FeedConfig {
        FeedConfig {
            endpoint: self.feed_settings.endpoint.clone(),
            session_token,
            api_key: self.api_key.clone(),
            max_connect_attempts: self.feed_settings.max_connect_attempts,
            retry_delay_seconds: self.feed_settings.retry_delay_seconds,
            connect_timeout_seconds: self.feed_settings.connect_timeout_seconds,
        }
    }
}
