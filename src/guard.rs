//! Route guard.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::session::{Session, SessionState};

/// Navigable screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    SignUp,
    ForgotPassword,
    Profile,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::SignUp => "/signup",
            Self::ForgotPassword => "/forgot-password",
            Self::Profile => "/profile",
        }
    }

    /// `/` is the profile.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/login" => Some(Self::Login),
            "/signup" => Some(Self::SignUp),
            "/forgot-password" => Some(Self::ForgotPassword),
            "/profile" | "/" => Some(Self::Profile),
            _ => None,
        }
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, Self::Profile)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl Serialize for Route {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.path())
    }
}

/// What to show for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Render,
    Redirect(Route),
    /// Session not resolved yet: neither content nor redirect.
    Pending,
}

pub fn guard(route: Route, state: &SessionState) -> Access {
    if !route.requires_auth() {
        return Access::Render;
    }

    match state {
        SessionState::Authenticated(_) => Access::Render,
        SessionState::Anonymous => Access::Redirect(Route::Login),
        SessionState::Uninitialized | SessionState::Loading => Access::Pending,
    }
}

/// Wait for the session to resolve, then decide.
pub async fn resolve(route: Route, session: &Session) -> Access {
    if !route.requires_auth() {
        return Access::Render;
    }
    guard(route, &session.resolved().await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::adapters::memory::MemoryAuth;
    use crate::identity::{EmailAddress, Identity, IdentityId};
    use crate::session::DEFAULT_REFRESH_MARGIN;

    fn identity() -> Identity {
        Identity {
            id: IdentityId::parse("uid-1").unwrap(),
            email: EmailAddress::parse("jane@example.com").unwrap(),
            display_name: None,
            photo_url: None,
        }
    }

    #[test]
    fn test_paths() {
        assert_eq!(Route::from_path("/"), Some(Route::Profile));
        assert_eq!(Route::from_path("/forgot-password"), Some(Route::ForgotPassword));
        assert_eq!(Route::from_path("/admin"), None);
        assert_eq!(
            serde_json::to_string(&Route::SignUp).unwrap(),
            "\"/signup\""
        );
    }

    #[test]
    fn test_guard() {
        let authenticated = SessionState::Authenticated(identity());
        for state in [SessionState::Uninitialized, SessionState::Loading] {
            assert_eq!(guard(Route::Profile, &state), Access::Pending);
            assert_eq!(guard(Route::Login, &state), Access::Render);
        }
        assert_eq!(
            guard(Route::Profile, &SessionState::Anonymous),
            Access::Redirect(Route::Login)
        );
        assert_eq!(guard(Route::Profile, &authenticated), Access::Render);
        assert_eq!(guard(Route::SignUp, &authenticated), Access::Render);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_waits_for_session() {
        let session = Session::new(Arc::new(MemoryAuth::fast()), DEFAULT_REFRESH_MARGIN);

        // Never initialized: still pending after a while.
        let pending = tokio::time::timeout(
            Duration::from_secs(5),
            resolve(Route::Profile, &session),
        )
        .await;
        assert!(pending.is_err());

        session.initialize(None);
        assert_eq!(
            resolve(Route::Profile, &session).await,
            Access::Redirect(Route::Login)
        );
    }
}
