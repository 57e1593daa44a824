use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::entities::{Bulletin, Conversation, Message, NewsItem, Page};
use crate::error::ApiError;

/// Typed read-side surface of the Rookery REST API used by the sync
/// layer.
///
/// Targeted `get_*` lookups back re-fetches after change notifications;
/// `list_*` calls back paged refreshes. Implementations carry their own
/// authentication state, updated through [`ApiClient::set_session_token`]
/// when the signed-in account changes.
pub trait ApiClient: Send + Sync {
    fn set_session_token(&self, token: String) -> impl Future<Output = ()> + Send;

    fn get_conversation(
        &self,
        conversation_id: i64,
    ) -> impl Future<Output = Result<Conversation, ApiError>> + Send;

    fn list_conversations(
        &self,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Page<Conversation>, ApiError>> + Send;

    fn get_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Page<Message>, ApiError>> + Send;

    fn get_bulletin(
        &self,
        bulletin_id: i64,
    ) -> impl Future<Output = Result<Bulletin, ApiError>> + Send;

    fn list_bulletins(
        &self,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Page<Bulletin>, ApiError>> + Send;

    fn get_news_item(
        &self,
        news_item_id: i64,
    ) -> impl Future<Output = Result<NewsItem, ApiError>> + Send;

    fn list_news(
        &self,
        page: u32,
        per_page: u32,
    ) -> impl Future<Output = Result<Page<NewsItem>, ApiError>> + Send;
}

/// [`ApiClient`] over HTTPS.
///
/// Every request carries the deployment key in `X-Api-Key`; the bearer
/// token is added only while a session token is present.
pub struct HttpApiClient {
    http: Client,
    base_url: String,
    api_key: String,
    session_token: RwLock<String>,
}

impl HttpApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| ApiError::Network(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session_token: RwLock::new(String::new()),
        })
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let token = self.session_token.read().await.clone();

        let mut request = self.http.get(&url).header("X-Api-Key", &self.api_key);
        if !token.is_empty() {
            request = request.bearer_auth(&token);
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        debug!(%url, "api request");
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Network(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| ApiError::Decode(error.to_string()))
    }
}

fn page_query(page: u32, per_page: u32) -> [(&'static str, String); 2] {
    [
        ("page", page.to_string()),
        ("per_page", per_page.to_string()),
    ]
}

impl ApiClient for HttpApiClient {
    async fn set_session_token(&self, token: String) {
        *self.session_token.write().await = token;
    }

    async fn get_conversation(&self, conversation_id: i64) -> Result<Conversation, ApiError> {
        self.get_json(&format!("/conversations/{conversation_id}"), &[])
            .await
    }

    async fn list_conversations(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Conversation>, ApiError> {
        self.get_json("/conversations", &page_query(page, per_page))
            .await
    }

    async fn get_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<Message, ApiError> {
        self.get_json(
            &format!("/conversations/{conversation_id}/messages/{message_id}"),
            &[],
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Message>, ApiError> {
        self.get_json(
            &format!("/conversations/{conversation_id}/messages"),
            &page_query(page, per_page),
        )
        .await
    }

    async fn get_bulletin(&self, bulletin_id: i64) -> Result<Bulletin, ApiError> {
        self.get_json(&format!("/bulletins/{bulletin_id}"), &[]).await
    }

    async fn list_bulletins(&self, page: u32, per_page: u32) -> Result<Page<Bulletin>, ApiError> {
        self.get_json("/bulletins", &page_query(page, per_page)).await
    }

    async fn get_news_item(&self, news_item_id: i64) -> Result<NewsItem, ApiError> {
        self.get_json(&format!("/news/{news_item_id}"), &[]).await
    }

    async fn list_news(&self, page: u32, per_page: u32) -> Result<Page<NewsItem>, ApiError> {
        self.get_json("/news", &page_query(page, per_page)).await
    }
}
