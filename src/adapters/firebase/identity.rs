//! Firebase Authentication over the Identity Toolkit REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::check;
use crate::identity::{
    AccessToken, EmailAddress, ExternalCredential, Grant, Identity, IdentityChanges,
    IdentityId, Password, RefreshToken,
};
use crate::ports::{AuthProvider, ProviderError, Result, ToTransport};

const DEFAULT_REQUEST_URI: &str = "http://localhost";

/// [`AuthProvider`] backed by Firebase Authentication.
pub struct FirebaseAuth {
    http: Client,
    api_key: String,
    identity_url: String,
    token_url: String,
    request_uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OobRequest<'a> {
    request_type: &'static str,
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    delete_attribute: Vec<&'static str>,
    return_secure_token: bool,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

/// Account fields common to every Identity Toolkit answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    local_id: String,
    #[serde(default)]
    email: String,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl UserInfo {
    fn into_identity(self) -> Result<Identity> {
        let id = IdentityId::parse(self.local_id)
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;
        let email = EmailAddress::parse(&self.email)
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;

        Ok(Identity {
            id,
            email,
            display_name: self.display_name.filter(|s| !s.is_empty()),
            photo_url: self.photo_url.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    #[serde(flatten)]
    user: UserInfo,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<UserInfo>,
}

/// Token lifetimes are sent as a string of seconds.
fn lifetime(expires_in: &str) -> Result<Duration> {
    expires_in
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ProviderError::Rejected(format!("invalid expiresIn: {expires_in}")))
}

impl FirebaseAuth {
    pub fn new(
        http: Client,
        api_key: impl Into<String>,
        identity_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            identity_url: identity_url.into(),
            token_url: token_url.into(),
            request_uri: DEFAULT_REQUEST_URI.to_owned(),
        }
    }

    /// Redirect URI registered for external identity providers.
    pub fn request_uri(mut self, uri: Option<String>) -> Self {
        if let Some(uri) = uri {
            self.request_uri = uri;
        }
        self
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(format!("{}/accounts:{method}", self.identity_url))
            .query(&[("key", &self.api_key)])
            .json(body)
            .send()
            .await
            .catch()?;

        check(response).await?.json::<R>().await.catch()
    }

    fn grant(response: SignInResponse) -> Result<Grant> {
        Ok(Grant {
            expires_in: lifetime(&response.expires_in)?,
            identity: response.user.into_identity()?,
            access_token: AccessToken::new(response.id_token),
            refresh_token: RefreshToken::new(response.refresh_token),
        })
    }

    async fn lookup(&self, token: &AccessToken) -> Result<Identity> {
        let response: LookupResponse = self
            .call("lookup", &LookupRequest {
                id_token: token.as_str(),
            })
            .await?;

        response
            .users
            .into_iter()
            .next()
            .ok_or(ProviderError::UserNotFound)?
            .into_identity()
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant> {
        let response = self
            .call("signInWithPassword", &PasswordRequest {
                email: email.as_str(),
                password: password.as_str(),
                return_secure_token: true,
            })
            .await?;

        Self::grant(response)
    }

    async fn sign_in_with_idp(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Grant> {
        let id_token = credential
            .id_token
            .as_deref()
            .ok_or(ProviderError::Cancelled)?;
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", id_token)
            .append_pair("providerId", &credential.provider_id)
            .finish();

        let response = self
            .call("signInWithIdp", &IdpRequest {
                post_body,
                request_uri: &self.request_uri,
                return_secure_token: true,
                return_idp_credential: true,
            })
            .await?;

        Self::grant(response)
    }

    async fn sign_up(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant> {
        let response = self
            .call("signUp", &PasswordRequest {
                email: email.as_str(),
                password: password.as_str(),
                return_secure_token: true,
            })
            .await?;

        Self::grant(response)
    }

    async fn send_password_reset(&self, email: &EmailAddress) -> Result<()> {
        let _: serde_json::Value = self
            .call("sendOobCode", &OobRequest {
                request_type: "PASSWORD_RESET",
                email: email.as_str(),
            })
            .await?;

        Ok(())
    }

    async fn update_identity(
        &self,
        token: &AccessToken,
        changes: &IdentityChanges,
    ) -> Result<Identity> {
        // Empty values remove the attribute.
        let mut delete_attribute = Vec::new();
        if changes.display_name.as_deref() == Some("") {
            delete_attribute.push("DISPLAY_NAME");
        }
        if changes.photo_url.as_deref() == Some("") {
            delete_attribute.push("PHOTO_URL");
        }

        let response: UserInfo = self
            .call("update", &UpdateRequest {
                id_token: token.as_str(),
                display_name: changes.display_name.as_deref().filter(|s| !s.is_empty()),
                photo_url: changes.photo_url.as_deref().filter(|s| !s.is_empty()),
                delete_attribute,
                return_secure_token: false,
            })
            .await?;

        response.into_identity()
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<Grant> {
        let response = self
            .http
            .post(format!("{}/token", self.token_url))
            .query(&[("key", &self.api_key)])
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: refresh_token.as_str(),
            })
            .send()
            .await
            .catch()?;
        let response: RefreshResponse = check(response).await?.json().await.catch()?;

        // The token endpoint does not return the profile.
        let access_token = AccessToken::new(response.id_token);
        let identity = self.lookup(&access_token).await?;

        Ok(Grant {
            expires_in: lifetime(&response.expires_in)?,
            identity,
            access_token,
            refresh_token: RefreshToken::new(response.refresh_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn setup() -> (MockServer, FirebaseAuth) {
        let server = MockServer::start().await;
        let auth = FirebaseAuth::new(
            Client::new(),
            "test-key",
            format!("{}/v1", server.uri()),
            format!("{}/token/v1", server.uri()),
        );
        (server, auth)
    }

    fn signed_in() -> serde_json::Value {
        json!({
            "localId": "uid-1",
            "email": "jane@example.com",
            "displayName": "Jane",
            "idToken": "id-token",
            "refreshToken": "refresh-token",
            "expiresIn": "3600",
            "registered": true
        })
    }

    #[tokio::test]
    async fn test_sign_in_with_password() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "email": "jane@example.com",
                "password": "secret1",
                "returnSecureToken": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(signed_in()))
            .expect(1)
            .mount(&server)
            .await;

        let grant = auth
            .sign_in_with_password(
                &EmailAddress::parse("jane@example.com").unwrap(),
                &Password::new("secret1"),
            )
            .await
            .unwrap();
        assert_eq!(grant.identity.id.as_str(), "uid-1");
        assert_eq!(grant.identity.display_name.as_deref(), Some("Jane"));
        assert_eq!(grant.access_token, AccessToken::new("id-token"));
        assert_eq!(grant.expires_in, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_sign_up_existing_email() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "EMAIL_EXISTS", "errors": [] }
            })))
            .mount(&server)
            .await;

        let err = auth
            .sign_up(
                &EmailAddress::parse("jane@example.com").unwrap(),
                &Password::new("secret1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmailExists));
    }

    #[tokio::test]
    async fn test_password_reset() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendOobCode"))
            .and(body_partial_json(json!({
                "requestType": "PASSWORD_RESET",
                "email": "nobody@example.com"
            })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "EMAIL_NOT_FOUND" }
            })))
            .mount(&server)
            .await;

        let err = auth
            .send_password_reset(&EmailAddress::parse("nobody@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UserNotFound));
    }

    #[tokio::test]
    async fn test_update_identity() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:update"))
            .and(body_partial_json(json!({
                "idToken": "id-token",
                "photoUrl": "https://cdn.example.com/p.png",
                "deleteAttribute": ["DISPLAY_NAME"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "localId": "uid-1",
                "email": "jane@example.com",
                "photoUrl": "https://cdn.example.com/p.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let identity = auth
            .update_identity(&AccessToken::new("id-token"), &IdentityChanges {
                display_name: Some(String::new()),
                photo_url: Some("https://cdn.example.com/p.png".into()),
            })
            .await
            .unwrap();
        assert_eq!(identity.display_name, None);
        assert_eq!(
            identity.photo_url.as_deref(),
            Some("https://cdn.example.com/p.png")
        );
    }

    #[tokio::test]
    async fn test_refresh() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/token/v1/token"))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "refresh-token"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expires_in": "3600",
                "token_type": "Bearer",
                "refresh_token": "refresh-token-2",
                "id_token": "id-token-2",
                "user_id": "uid-1",
                "project_id": "demo"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .and(body_partial_json(json!({ "idToken": "id-token-2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{ "localId": "uid-1", "email": "jane@example.com" }]
            })))
            .mount(&server)
            .await;

        let grant = auth
            .refresh(&RefreshToken::new("refresh-token"))
            .await
            .unwrap();
        assert_eq!(grant.access_token, AccessToken::new("id-token-2"));
        assert_eq!(grant.refresh_token, RefreshToken::new("refresh-token-2"));
        assert_eq!(grant.identity.email.as_str(), "jane@example.com");
    }

    #[tokio::test]
    async fn test_refresh_revoked() {
        let (server, auth) = setup().await;
        Mock::given(method("POST"))
            .and(path("/token/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "TOKEN_EXPIRED", "status": "INVALID_ARGUMENT" }
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            auth.refresh(&RefreshToken::new("old")).await,
            Err(ProviderError::SessionExpired)
        ));
    }
}
