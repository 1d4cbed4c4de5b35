//! Session provider.
//!
//! A [`Session`] is the single source of truth for "who is signed in" in one
//! browser context. It is the only writer of its state; screens and the route
//! guard read it through [`Session::state`], [`Session::subscribe`] or
//! [`Session::resolved`].
//!
//! Lifecycle: `Uninitialized → Loading → {Authenticated | Anonymous}`. After
//! [`Session::initialize`], a background task keeps the access token fresh and
//! moves the session to `Anonymous` on its own when the provider refuses to
//! refresh it (expired or revoked session).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::identity::{
    AccessToken, EmailAddress, ExternalCredential, Grant, Identity,
    IdentityChanges, Password, Principal, RefreshToken,
};
use crate::ports::{AuthProvider, ProviderError};

/// Default lead time before expiry at which tokens are refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Authentication state as seen by screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated(Identity),
    Anonymous,
}

impl SessionState {
    /// Whether the provider has answered at least once.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::Anonymous)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Failures of session operations. The provider detail is kept as source.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials(#[source] ProviderError),
    #[error("external provider sign-in failed")]
    ExternalAuthFailed(#[source] ProviderError),
    #[error("account creation failed")]
    AccountCreationFailed(#[source] ProviderError),
    #[error("password reset dispatch failed")]
    ResetFailed(#[source] ProviderError),
    #[error("identity update failed")]
    UpdateFailed(#[source] ProviderError),
    #[error("not signed in")]
    NotSignedIn,
}

impl AuthError {
    /// Generic message shown to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => {
                "Failed to sign in. Please check your email and password."
            },
            Self::ExternalAuthFailed(_) => "Failed to sign in with the external provider.",
            Self::AccountCreationFailed(_) => "Failed to create an account.",
            Self::ResetFailed(_) => "Failed to send the password reset email.",
            Self::UpdateFailed(_) => "Failed to update profile.",
            Self::NotSignedIn => "You must be signed in.",
        }
    }
}

struct Tokens {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    refresh_at: Instant,
}

struct Inner {
    provider: Arc<dyn AuthProvider>,
    state: watch::Sender<SessionState>,
    tokens: Mutex<Option<Tokens>>,
    refresh_margin: Duration,
}

impl Inner {
    fn tokens(&self) -> MutexGuard<'_, Option<Tokens>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_deadline(&self) -> Option<Instant> {
        self.tokens().as_ref().map(|t| t.refresh_at)
    }
}

/// Owned, cloneable handle to one authentication context.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl Session {
    /// Create an uninitialized [`Session`].
    pub fn new(provider: Arc<dyn AuthProvider>, refresh_margin: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);

        Self {
            inner: Arc::new(Inner {
                provider,
                state,
                tokens: Mutex::new(None),
                refresh_margin,
            }),
        }
    }

    /// Start resolving the session, optionally from a previous refresh token.
    ///
    /// Only the first call has an effect. Must run inside a Tokio runtime.
    pub fn initialize(&self, restore: Option<RefreshToken>) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Uninitialized {
                *state = SessionState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let changes = self.inner.state.subscribe();
        if restore.is_none() {
            self.publish(SessionState::Anonymous);
        }
        tokio::spawn(async move {
            if let Some(token) = restore {
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.restore(token).await;
                }
            }

            keep_alive(weak, changes).await;
        });
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session is authenticated or anonymous.
    ///
    /// Never returns for a session that was not initialized.
    pub async fn resolved(&self) -> SessionState {
        let mut changes = self.subscribe();
        match changes.wait_for(SessionState::is_resolved).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Current identity and the token to act on its behalf.
    pub fn principal(&self) -> Option<Principal> {
        let tokens = self.inner.tokens();
        let token = tokens.as_ref()?.access_token.clone();
        let identity = self.inner.state.borrow().identity()?.clone();

        Some(Principal { identity, token })
    }

    pub async fn sign_in(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Identity, AuthError> {
        let grant = self
            .inner
            .provider
            .sign_in_with_password(email, password)
            .await
            .map_err(AuthError::InvalidCredentials);

        self.conclude("sign_in", grant)
    }

    pub async fn sign_in_with_provider(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Identity, AuthError> {
        let grant = if credential.id_token.is_none() {
            Err(AuthError::ExternalAuthFailed(ProviderError::Cancelled))
        } else {
            self.inner
                .provider
                .sign_in_with_idp(credential)
                .await
                .map_err(AuthError::ExternalAuthFailed)
        };

        self.conclude("sign_in_with_provider", grant)
    }

    pub async fn sign_up(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Identity, AuthError> {
        let grant = self
            .inner
            .provider
            .sign_up(email, password)
            .await
            .map_err(AuthError::AccountCreationFailed);

        self.conclude("sign_up", grant)
    }

    /// Ask the provider to send a reset message.
    ///
    /// An unknown email is reported as success: the provider must not leak
    /// which accounts exist.
    pub async fn reset_password(&self, email: &EmailAddress) -> Result<(), AuthError> {
        match self.inner.provider.send_password_reset(email).await {
            Ok(()) | Err(ProviderError::UserNotFound) => {
                record("reset_password", "success");
                Ok(())
            },
            Err(err) => {
                record("reset_password", "failure");
                tracing::warn!(error = ?err, "password reset dispatch failed");
                Err(AuthError::ResetFailed(err))
            },
        }
    }

    /// Change display name and/or photo of the signed-in identity.
    pub async fn update_identity(
        &self,
        changes: &IdentityChanges,
    ) -> Result<Identity, AuthError> {
        let principal = self.principal().ok_or(AuthError::NotSignedIn)?;

        match self
            .inner
            .provider
            .update_identity(&principal.token, changes)
            .await
        {
            Ok(identity) => {
                record("update_identity", "success");
                // Only republish if nobody signed in as someone else meanwhile.
                self.inner.state.send_if_modified(|state| match state {
                    SessionState::Authenticated(current)
                        if current.id == identity.id && *current != identity =>
                    {
                        *current = identity.clone();
                        true
                    },
                    _ => false,
                });
                Ok(identity)
            },
            Err(err) => {
                record("update_identity", "failure");
                tracing::warn!(
                    user_id = %principal.identity.id,
                    error = ?err,
                    "identity update failed"
                );
                Err(AuthError::UpdateFailed(err))
            },
        }
    }

    /// Forget credentials and become anonymous. Calling it twice is harmless.
    pub fn sign_out(&self) {
        let mut tokens = self.inner.tokens();
        if tokens.take().is_some() {
            record("sign_out", "success");
        }
        self.publish(SessionState::Anonymous);
    }

    fn conclude(
        &self,
        operation: &'static str,
        grant: Result<Grant, AuthError>,
    ) -> Result<Identity, AuthError> {
        match grant {
            Ok(grant) => {
                record(operation, "success");
                Ok(self.establish(grant))
            },
            Err(err) => {
                record(operation, "failure");
                tracing::warn!(operation, error = ?err, "authentication failed");
                Err(err)
            },
        }
    }

    fn establish(&self, grant: Grant) -> Identity {
        let delay = grant
            .expires_in
            .saturating_sub(self.inner.refresh_margin)
            .max(grant.expires_in / 2)
            .max(MIN_REFRESH_DELAY);

        let mut tokens = self.inner.tokens();
        *tokens = Some(Tokens {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            refresh_at: Instant::now() + delay,
        });
        self.publish(SessionState::Authenticated(grant.identity.clone()));

        grant.identity
    }

    async fn restore(&self, refresh_token: RefreshToken) {
        match self.inner.provider.refresh(&refresh_token).await {
            Ok(grant) => {
                record("restore", "success");
                self.establish(grant);
            },
            Err(err) => {
                record("restore", "failure");
                tracing::info!(error = ?err, "previous session could not be restored");
                self.publish(SessionState::Anonymous);
            },
        }
    }

    async fn refresh(&self) {
        let Some(refresh_token) = self
            .inner
            .tokens()
            .as_ref()
            .map(|t| t.refresh_token.clone())
        else {
            return;
        };

        let result = self.inner.provider.refresh(&refresh_token).await;

        // The user may have signed out or in while the request was running.
        let current = self
            .inner
            .tokens()
            .as_ref()
            .is_some_and(|t| t.refresh_token == refresh_token);
        if !current {
            return;
        }

        match result {
            Ok(grant) => {
                record("refresh", "success");
                self.establish(grant);
            },
            Err(err) => {
                record("refresh", "failure");
                tracing::warn!(error = ?err, "session expired");
                self.inner.tokens().take();
                self.publish(SessionState::Anonymous);
            },
        }
    }

    fn publish(&self, next: SessionState) {
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }

            match &next {
                SessionState::Authenticated(identity) => {
                    tracing::info!(user_id = %identity.id, "session authenticated")
                },
                SessionState::Anonymous => tracing::info!("session anonymous"),
                _ => tracing::debug!(state = ?next, "session state changed"),
            }
            *state = next;
            true
        });
    }
}

/// Refresh tokens before they expire. Ends with the session.
async fn keep_alive(inner: Weak<Inner>, mut changes: watch::Receiver<SessionState>) {
    loop {
        let deadline = match inner.upgrade() {
            Some(inner) => inner.refresh_deadline(),
            None => return,
        };

        match deadline {
            Some(deadline) => tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    let Some(inner) = inner.upgrade() else { return };
                    Session { inner }.refresh().await;
                }
                changed = changes.changed() => if changed.is_err() { return },
            },
            None => {
                if changes.changed().await.is_err() {
                    return;
                }
            },
        }
    }
}

fn record(operation: &'static str, outcome: &'static str) {
    metrics::counter!(
        "auth_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
