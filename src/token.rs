use std::sync::Mutex;

use keyring::Entry;
use tracing::{info, warn};

use crate::error::ClientError;

const TOKEN_ACCOUNT: &str = "bearer-token";

/// Persistence for the bearer token. Only the HTTP client reads it and only
/// the session store writes it.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, ClientError>;
    fn set(&self, token: &str) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// Token kept in the OS keychain.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, ClientError> {
        Entry::new(&self.service, TOKEN_ACCOUNT).map_err(|e| {
            warn!("Failed to create keyring entry for {}: {}", self.service, e);
            ClientError::TokenStore(e.to_string())
        })
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Result<Option<String>, ClientError> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                warn!("Failed to read token for {}: {}", self.service, e);
                Err(ClientError::TokenStore(e.to_string()))
            }
        }
    }

    fn set(&self, token: &str) -> Result<(), ClientError> {
        info!("Storing session token for service: {}", self.service);
        self.entry()?.set_password(token).map_err(|e| {
            warn!("Failed to store token for {}: {}", self.service, e);
            ClientError::TokenStore(e.to_string())
        })
    }

    fn clear(&self) -> Result<(), ClientError> {
        info!("Clearing session token for service: {}", self.service);
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!("Failed to delete token for {}: {}", self.service, e);
                Err(ClientError::TokenStore(e.to_string()))
            }
        }
    }
}

/// Process-local token, used for tests and one-shot sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<String>, ClientError> {
        Ok(self.slot().clone())
    }

    fn set(&self, token: &str) -> Result<(), ClientError> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot() = None;
        Ok(())
    }
}
