//! These traits define what the application needs from the outside world.

pub mod auth;
pub mod clock;
pub mod document;
pub mod file;

pub use auth::*;
pub use clock::*;
pub use document::*;
pub use file::*;

/// Result type shared by every port.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure reported by a backing service.
///
/// Adapters classify the provider's own codes into these variants. The
/// original detail stays available for logs but is never shown to users.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email already in use")]
    EmailExists,
    #[error("password is too weak")]
    WeakPassword,
    #[error("user not found")]
    UserNotFound,
    #[error("sign-in cancelled by user")]
    Cancelled,
    #[error("session expired")]
    SessionExpired,
    #[error("permission denied")]
    PermissionDenied,
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("provider unreachable")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Wrap any foreign error as a [`ProviderError::Transport`].
pub trait ToTransport<T> {
    fn catch(self) -> Result<T>;
}

impl<T, E> ToTransport<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn catch(self) -> Result<T> {
        self.map_err(ProviderError::transport)
    }
}
