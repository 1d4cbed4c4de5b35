//! Authentication service port.

use async_trait::async_trait;

use super::Result;
use crate::identity::{
    AccessToken, EmailAddress, ExternalCredential, Grant, Identity,
    IdentityChanges, Password, RefreshToken,
};

/// Port for the external authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Sign in with email and password.
    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant>;

    /// Exchange a credential from an external identity provider.
    async fn sign_in_with_idp(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Grant>;

    /// Create a new account and sign it in.
    async fn sign_up(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant>;

    /// Dispatch a password reset message.
    async fn send_password_reset(&self, email: &EmailAddress) -> Result<()>;

    /// Change display name and/or photo of the token's identity.
    async fn update_identity(
        &self,
        token: &AccessToken,
        changes: &IdentityChanges,
    ) -> Result<Identity>;

    /// Obtain a fresh access token.
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<Grant>;
}
