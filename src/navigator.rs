use std::sync::Mutex;

use url::Url;

/// Where control goes when the client needs the user somewhere else: the
/// login entry point after an auth failure, or a provider-hosted page
/// (checkout, OAuth consent).
pub trait Navigator: Send + Sync {
    fn to_login(&self);
    fn open_external(&self, url: &Url);
}

/// A request made through a [`RecordingNavigator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Login,
    External(String),
}

/// Keeps every navigation request in order. Headless callers inspect it
/// after an operation.
#[derive(Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Navigation> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn login_redirects(&self) -> usize {
        self.history()
            .iter()
            .filter(|n| matches!(n, Navigation::Login))
            .count()
    }

    fn push(&self, nav: Navigation) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(nav);
    }
}

impl Navigator for RecordingNavigator {
    fn to_login(&self) {
        self.push(Navigation::Login);
    }

    fn open_external(&self, url: &Url) {
        self.push(Navigation::External(url.to_string()));
    }
}
