//! Client context and session lifecycle.
//!
//! The context is passed explicitly into [`crate::CacheEngine`] and
//! [`crate::SyncCoordinator`] constructors. There is no ambient global
//! session: a `Session` is installed at login and torn down at logout, and
//! every request built while one is installed carries its auth token.

use crate::config::StoreConfig;
use crate::remote::Endpoints;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An authenticated user session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Id of the authenticated user.
    pub user_id: String,
    /// Auth token to present on requests.
    pub auth_token: String,
}

impl Session {
    /// Creates a session.
    pub fn new(user_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
        }
    }
}

/// Shared client state: configuration plus the current session.
#[derive(Debug)]
pub struct ClientContext {
    config: StoreConfig,
    session: RwLock<Option<Session>>,
}

impl ClientContext {
    /// Creates a context with no active session.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the endpoint builder for this context's backend.
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.config.base_url, &self.config.app_key)
    }

    /// Installs a session. Called at login.
    pub fn login(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    /// Tears down the session, returning it. Called at logout.
    pub fn logout(&self) -> Option<Session> {
        self.session.write().take()
    }

    /// Returns a copy of the current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Headers to attach to authenticated requests.
    pub fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(session) = self.session.read().as_ref() {
            headers.insert(
                "authorization".to_string(),
                format!("Bearer {}", session.auth_token),
            );
        }
        headers
    }
}
