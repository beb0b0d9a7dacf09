use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::api::types::User;
use crate::api::UserApi;
use crate::error::ClientError;
use crate::navigator::Navigator;
use crate::token::TokenStore;

/// Holds the signed-in user and the only operations allowed to change it.
///
/// Components read the user through [`SessionStore::current_user`]; writes
/// happen through `login`, `logout` and `refresh_user`. The token itself
/// never leaves the token store and the HTTP client.
pub struct SessionStore<A: ?Sized> {
    api: Arc<A>,
    tokens: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    user: RwLock<Option<User>>,
    loading: AtomicBool,
}

impl<A: UserApi + ?Sized> SessionStore<A> {
    /// A new store starts in the loading state until [`SessionStore::init`]
    /// has run.
    pub fn new(api: Arc<A>, tokens: Arc<dyn TokenStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            api,
            tokens,
            navigator,
            user: RwLock::new(None),
            loading: AtomicBool::new(true),
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Restore a persisted session, if any.
    pub async fn init(&self) -> Option<User> {
        self.fetch_user().await
    }

    /// Persist `token` and load the user it belongs to. A token the backend
    /// rejects is discarded and the store ends logged out; only a failure to
    /// persist the token is returned as an error.
    pub async fn login(&self, token: &str) -> Result<Option<User>, ClientError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ClientError::InvalidInput(
                "No authentication token received.".to_string(),
            ));
        }
        self.tokens.set(token)?;
        Ok(self.fetch_user().await)
    }

    /// Drop the session locally. No request is made.
    pub fn logout(&self) {
        info!("Logging out");
        if let Err(e) = self.tokens.clear() {
            warn!("Failed to clear stored token on logout: {}", e);
        }
        self.set_user(None);
        self.loading.store(false, Ordering::SeqCst);
    }

    /// Re-fetch after anything that can change credits or tier: a payment
    /// completing, a job finishing, a generation being submitted.
    pub async fn refresh_user(&self) -> Option<User> {
        self.fetch_user().await
    }

    /// Gate for protected views. Without a user this redirects to login and
    /// fails before any request is issued.
    pub fn require_user(&self) -> Result<User, ClientError> {
        match self.current_user() {
            Some(user) => Ok(user),
            None => {
                self.navigator.to_login();
                Err(ClientError::LoginRequired)
            }
        }
    }

    /// Finish an OAuth round trip from the callback's `token` / `error`
    /// query parameters.
    pub async fn complete_oauth(
        &self,
        token: Option<&str>,
        error: Option<&str>,
    ) -> Result<User, ClientError> {
        if let Some(error) = error {
            warn!("OAuth callback returned error: {}", error);
            return Err(ClientError::InvalidInput(
                "OAuth authentication failed. Please try again.".to_string(),
            ));
        }
        let token = token.ok_or_else(|| {
            ClientError::InvalidInput("No authentication token received.".to_string())
        })?;
        self.login(token).await?.ok_or_else(|| {
            ClientError::InvalidInput("Failed to complete login. Please try again.".to_string())
        })
    }

    async fn fetch_user(&self) -> Option<User> {
        self.loading.store(true, Ordering::SeqCst);

        let has_token = match self.tokens.get() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!("Failed to read stored token: {}", e);
                false
            }
        };

        let user = if has_token {
            match self.api.get_me().await {
                Ok(user) => {
                    info!("Session active for {}", user.email);
                    Some(user)
                }
                Err(e) => {
                    warn!("Failed to fetch user: {}", e);
                    if let Err(e) = self.tokens.clear() {
                        warn!("Failed to discard rejected token: {}", e);
                    }
                    None
                }
            }
        } else {
            None
        };

        self.set_user(user.clone());
        self.loading.store(false, Ordering::SeqCst);
        user
    }

    fn set_user(&self, user: Option<User>) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = user;
    }
}
