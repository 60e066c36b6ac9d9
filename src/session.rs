//! Identity and token capability consumed by the engine.
//!
//! The OAuth/redirect dance lives outside the crate; the host implements
//! [`SessionProvider`] (or uses [`StaticSession`] and pushes tokens into it)
//! and the engine only asks "who is signed in" and "give me a token".

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notify::{NotifyHub, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: String,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NoIdentity,
    /// A token can only be obtained after the user signs in again.
    InteractionRequired(String),
    Failed(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoIdentity => write!(f, "no active account"),
            SessionError::InteractionRequired(msg) => write!(f, "interactive sign-in required: {msg}"),
            SessionError::Failed(msg) => write!(f, "token acquisition failed: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Auth state changes pushed by the session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
    TokenExpired,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn active_identity(&self) -> Option<Identity>;

    /// Bearer token for `scopes`. May wait on the host's token cache.
    async fn access_token(&self, scopes: &[String]) -> Result<String, SessionError>;

    /// Subscribe to auth state changes. Dropping the subscription unsubscribes.
    fn subscribe(&self) -> Subscription<AuthEvent>;
}

struct SessionState {
    identity: Option<Identity>,
    token: Option<String>,
}

/// Session whose identity and token are set by the host process.
pub struct StaticSession {
    state: RwLock<SessionState>,
    events: NotifyHub<AuthEvent>,
}

impl Default for StaticSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticSession {
    /// A signed-out session.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState {
                identity: None,
                token: None,
            }),
            events: NotifyHub::new(),
        }
    }

    pub fn signed_in(identity: Identity, token: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(identity, token);
        session
    }

    pub fn sign_in(&self, identity: Identity, token: impl Into<String>) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.identity = Some(identity.clone());
            state.token = Some(token.into());
        }
        self.events.send(&AuthEvent::SignedIn(identity));
    }

    pub fn sign_out(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.identity = None;
            state.token = None;
        }
        self.events.send(&AuthEvent::SignedOut);
    }

    /// Drop the cached token; the next token request needs interaction.
    pub fn expire_token(&self) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).token = None;
        self.events.send(&AuthEvent::TokenExpired);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    fn active_identity(&self) -> Option<Identity> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).identity.clone()
    }

    async fn access_token(&self, _scopes: &[String]) -> Result<String, SessionError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.identity.is_none() {
            return Err(SessionError::NoIdentity);
        }
        state
            .token
            .clone()
            .ok_or_else(|| SessionError::InteractionRequired("cached token expired".into()))
    }

    fn subscribe(&self) -> Subscription<AuthEvent> {
        self.events.subscribe()
    }
}
