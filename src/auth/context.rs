use std::sync::Arc;
use tokio::sync::watch;

use crate::errors::ChatError;
use crate::models::users::UserView;

/// Holds the signed-in user. The user id scopes every cache key and every
/// mutation, so nothing runs without one.
#[derive(Clone)]
pub struct AuthContext {
    current_user: Arc<watch::Sender<Option<UserView>>>,
}

impl Default for AuthContext {
    fn default() -> Self {
        let (current_user, _) = watch::channel(None);
        Self {
            current_user: Arc::new(current_user),
        }
    }
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: UserView) -> Self {
        let auth = Self::default();
        auth.sign_in(user);
        auth
    }

    pub fn sign_in(&self, user: UserView) {
        log::info!("signed in as {}", user.label());
        self.current_user.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        self.current_user.send_replace(None);
    }

    pub fn current_user(&self) -> Option<UserView> {
        self.current_user.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.current_user.borrow().as_ref().map(|user| user.id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.borrow().is_some()
    }

    pub fn require_user_id(&self) -> Result<String, ChatError> {
        self.user_id().ok_or(ChatError::AuthenticationRequired)
    }

    /// Fires whenever the user signs in or out.
    pub fn watch(&self) -> watch::Receiver<Option<UserView>> {
        self.current_user.subscribe()
    }
}
