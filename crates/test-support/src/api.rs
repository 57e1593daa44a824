use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use rookery_api::{ApiClient, ApiError, Bulletin, Conversation, Message, NewsItem, Page};
use tokio::sync::Notify;

struct FamilyState<T> {
    entities: HashMap<i64, T>,
    list_pages: VecDeque<Page<T>>,
    get_requests: Vec<i64>,
    list_requests: Vec<(u32, u32)>,
    fail_next_get: Option<ApiError>,
    fail_next_list: Option<ApiError>,
    stall_next_list: Option<Arc<Notify>>,
}

impl<T> Default for FamilyState<T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            list_pages: VecDeque::new(),
            get_requests: Vec::new(),
            list_requests: Vec::new(),
            fail_next_get: None,
            fail_next_list: None,
            stall_next_list: None,
        }
    }
}

/// Scripted behavior for one entity family.
///
/// Targeted lookups are served from the `insert`ed entities (absent id
/// means `NotFound`); list calls pop pre-scripted pages in order and
/// fall back to an empty zero-page response once the script runs out.
pub struct ScriptedFamily<T> {
    state: Mutex<FamilyState<T>>,
}

impl<T> Default for ScriptedFamily<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FamilyState::default()),
        }
    }
}

impl<T: Clone> ScriptedFamily<T> {
    pub fn insert(&self, id: i64, entity: T) {
        self.lock().entities.insert(id, entity);
    }

    pub fn remove(&self, id: i64) {
        self.lock().entities.remove(&id);
    }

    pub fn push_page(&self, page: Page<T>) {
        self.lock().list_pages.push_back(page);
    }

    /// Fail the next targeted lookup with this error, once.
    pub fn fail_next_get(&self, error: ApiError) {
        self.lock().fail_next_get = Some(error);
    }

    /// Fail the next list call with this error, once.
    pub fn fail_next_list(&self, error: ApiError) {
        self.lock().fail_next_list = Some(error);
    }

    /// Hold the next list call open until the returned handle is
    /// notified, so tests can observe overlapping refreshes.
    pub fn stall_next_list(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.lock().stall_next_list = Some(Arc::clone(&release));
        release
    }

    /// Entity ids requested through targeted lookups, in call order.
    pub fn get_requests(&self) -> Vec<i64> {
        self.lock().get_requests.clone()
    }

    /// `(page, per_page)` pairs requested through list calls, in call order.
    pub fn list_requests(&self) -> Vec<(u32, u32)> {
        self.lock().list_requests.clone()
    }

    fn scripted_get(&self, id: i64) -> Result<T, ApiError> {
        let mut state = self.lock();
        state.get_requests.push(id);

        if let Some(error) = state.fail_next_get.take() {
            return Err(error);
        }
        state.entities.get(&id).cloned().ok_or(ApiError::NotFound)
    }

    async fn scripted_list(&self, page: u32, per_page: u32) -> Result<Page<T>, ApiError> {
        let stall = {
            let mut state = self.lock();
            state.list_requests.push((page, per_page));
            state.stall_next_list.take()
        };
        if let Some(release) = stall {
            release.notified().await;
        }

        let mut state = self.lock();
        if let Some(error) = state.fail_next_list.take() {
            return Err(error);
        }
        Ok(state.list_pages.pop_front().unwrap_or(Page {
            items: Vec::new(),
            page,
            total_pages: 0,
            per_page,
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FamilyState<T>> {
        self.state.lock().expect("failed to lock scripted family")
    }
}

/// In-memory [`ApiClient`] driven entirely by the test.
#[derive(Default)]
pub struct ScriptedApi {
    pub conversations: ScriptedFamily<Conversation>,
    pub messages: ScriptedFamily<Message>,
    pub bulletins: ScriptedFamily<Bulletin>,
    pub news: ScriptedFamily<NewsItem>,
    session_tokens: Mutex<Vec<String>>,
    message_scopes: Mutex<Vec<i64>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every token passed to `set_session_token`, in call order.
    pub fn session_tokens(&self) -> Vec<String> {
        self.session_tokens
            .lock()
            .expect("failed to lock session tokens")
            .clone()
    }

    /// Conversation ids that scoped message lookups and listings.
    pub fn message_scopes(&self) -> Vec<i64> {
        self.message_scopes
            .lock()
            .expect("failed to lock message scopes")
            .clone()
    }

    fn record_message_scope(&self, conversation_id: i64) {
        self.message_scopes
            .lock()
            .expect("failed to lock message scopes")
            .push(conversation_id);
    }
}

impl ApiClient for ScriptedApi {
    async fn set_session_token(&self, token: String) {
        self.session_tokens
            .lock()
            .expect("failed to lock session tokens")
            .push(token);
    }

    async fn get_conversation(&self, conversation_id: i64) -> Result<Conversation, ApiError> {
        self.conversations.scripted_get(conversation_id)
    }

    async fn list_conversations(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Conversation>, ApiError> {
        self.conversations.scripted_list(page, per_page).await
    }

    async fn get_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<Message, ApiError> {
        self.record_message_scope(conversation_id);
        self.messages.scripted_get(message_id)
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Message>, ApiError> {
        self.record_message_scope(conversation_id);
        self.messages.scripted_list(page, per_page).await
    }

    async fn get_bulletin(&self, bulletin_id: i64) -> Result<Bulletin, ApiError> {
        self.bulletins.scripted_get(bulletin_id)
    }

    async fn list_bulletins(&self, page: u32, per_page: u32) -> Result<Page<Bulletin>, ApiError> {
        self.bulletins.scripted_list(page, per_page).await
    }

    async fn get_news_item(&self, news_item_id: i64) -> Result<NewsItem, ApiError> {
        self.news.scripted_get(news_item_id)
    }

    async fn list_news(&self, page: u32, per_page: u32) -> Result<Page<NewsItem>, ApiError> {
        self.news.scripted_list(page, per_page).await
    }
}
