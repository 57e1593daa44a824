use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Scalar session fields shared with the embedding application.
///
/// An empty `session_token` means signed out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub session_token: String,
    pub own_user_id: Option<i64>,
}

/// Identity of the profile field that changed, carried on the
/// notification channel so observers can react to exactly the fields
/// they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    SessionToken,
    OwnUserId,
}

/// Holds the [`Profile`] and broadcasts which field changed.
///
/// Setters notify only when the stored value actually changes, so
/// re-assigning an equal token produces no edge for observers.
pub struct ProfileStore {
    profile: RwLock<Profile>,
    changes: broadcast::Sender<ProfileField>,
}

impl ProfileStore {
    pub fn new(initial: Profile) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            profile: RwLock::new(initial),
            changes,
        }
    }

    pub async fn snapshot(&self) -> Profile {
        self.profile.read().await.clone()
    }

    pub async fn session_token(&self) -> String {
        self.profile.read().await.session_token.clone()
    }

    pub async fn own_user_id(&self) -> Option<i64> {
        self.profile.read().await.own_user_id
    }

    pub async fn set_session_token(&self, token: impl Into<String>) {
        let token = token.into();
        {
            let mut profile = self.profile.write().await;
            if profile.session_token == token {
                return;
            }
            profile.session_token = token;
        }

        debug!("session token updated");
        let _ = self.changes.send(ProfileField::SessionToken);
    }

    pub async fn set_own_user_id(&self, user_id: Option<i64>) {
        {
            let mut profile = self.profile.write().await;
            if profile.own_user_id == user_id {
                return;
            }
            profile.own_user_id = user_id;
        }

        debug!(?user_id, "own user id updated");
        let _ = self.changes.send(ProfileField::OwnUserId);
    }

    /// Subscribe to field-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ProfileField> {
        self.changes.subscribe()
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(Profile::default())
    }
}
