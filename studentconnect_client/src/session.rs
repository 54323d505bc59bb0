//! Who is logged in.
//!
//! The store owns the only writable copy of the session state and publishes
//! every transition through a `watch` channel; observers receive immutable
//! snapshots and never mutate the user in place. Concurrent mutations are
//! not serialized: whichever response lands last wins.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{ApiClient, ApiResult};
use crate::models::{AccessToken, Credentials, MessageResponse, ProfileUpdate, SignupRequest, User};
use crate::payload::Upload;
use crate::storage::TokenStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Startup has not looked at the stored token yet.
    Unresolved,
    /// A token is held and the backend is being asked who it belongs to.
    Resolving,
    Authenticated(Arc<User>),
    Anonymous,
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Unresolved | SessionState::Resolving)
    }

    pub fn current_user(&self) -> Option<&Arc<User>> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Flattened view for consumers that only care about the user and whether
/// resolution is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub current_user: Option<Arc<User>>,
    pub is_loading: bool,
}

impl From<&SessionState> for Session {
    fn from(state: &SessionState) -> Self {
        Self {
            current_user: state.current_user().cloned(),
            is_loading: state.is_loading(),
        }
    }
}

pub struct SessionStore {
    api: ApiClient,
    state: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(SessionState::Unresolved);
        Self { api, state }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn tokens(&self) -> &Arc<dyn TokenStore> {
        self.api.tokens()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Session {
        Session::from(&*self.state.borrow())
    }

    pub fn current_user(&self) -> Option<Arc<User>> {
        self.state.borrow().current_user().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Startup validation of the stored token. Never fails: any rejection
    /// erases the token and settles on `Anonymous`.
    pub async fn restore(&self) -> SessionState {
        if self.tokens().load().is_none() {
            tracing::debug!("no stored token; starting anonymous");
            self.transition(SessionState::Anonymous);
            return self.state();
        }
        if let Err(err) = self.resolve().await {
            tracing::warn!(error = %err, "stored token rejected; starting anonymous");
        }
        self.state()
    }

    pub async fn login(&self, credentials: &Credentials) -> ApiResult<AccessToken> {
        let token = match self.api.login(credentials).await {
            Ok(token) => token,
            Err(err) => {
                self.drop_session();
                return Err(err);
            }
        };
        self.tokens().store(&token.access_token)?;
        self.resolve().await?;
        Ok(token)
    }

    /// Creates the account only; the caller still has to log in.
    pub async fn signup(&self, input: &SignupRequest) -> ApiResult<User> {
        self.api.signup(input).await
    }

    pub fn logout(&self) -> ApiResult<()> {
        let cleared = self.tokens().clear();
        self.transition(SessionState::Anonymous);
        cleared?;
        Ok(())
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> ApiResult<Arc<User>> {
        let user = Arc::new(self.api.update_profile(update).await?);
        self.transition(SessionState::Authenticated(user.clone()));
        Ok(user)
    }

    pub async fn update_profile_picture(&self, upload: Upload) -> ApiResult<Arc<User>> {
        let user = Arc::new(self.api.update_profile_picture(upload).await?);
        self.transition(SessionState::Authenticated(user.clone()));
        Ok(user)
    }

    pub async fn forgot_password(&self, email: &str) -> ApiResult<MessageResponse> {
        self.api.forgot_password(email).await
    }

    /// Uses the out-of-band reset token, not the session's own.
    pub async fn reset_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> ApiResult<MessageResponse> {
        self.api.reset_password(reset_token, new_password).await
    }

    async fn resolve(&self) -> ApiResult<Arc<User>> {
        self.transition(SessionState::Resolving);
        match self.api.current_user().await {
            Ok(user) => {
                let user = Arc::new(user);
                self.transition(SessionState::Authenticated(user.clone()));
                Ok(user)
            }
            Err(err) => {
                self.drop_session();
                Err(err)
            }
        }
    }

    fn drop_session(&self) {
        if let Err(err) = self.tokens().clear() {
            tracing::warn!(error = %err, "failed to erase stored token");
        }
        self.transition(SessionState::Anonymous);
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        let current = self.state.borrow();
        match &*current {
            SessionState::Authenticated(user) => {
                tracing::info!(from = label(&previous), username = %user.username, "session authenticated")
            }
            other => tracing::info!(from = label(&previous), to = label(other), "session transition"),
        }
    }
}

fn label(state: &SessionState) -> &'static str {
    match state {
        SessionState::Unresolved => "unresolved",
        SessionState::Resolving => "resolving",
        SessionState::Authenticated(_) => "authenticated",
        SessionState::Anonymous => "anonymous",
    }
}
