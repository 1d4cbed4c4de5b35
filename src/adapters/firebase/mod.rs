//! Firebase REST backend.
//!
//! Authentication goes through the Identity Toolkit and Secure Token APIs,
//! profile records through Firestore and photos through Cloud Storage. Every
//! call acts with the signed-in user's own token, so the project's security
//! rules apply unchanged.

pub mod firestore;
pub mod identity;
pub mod storage;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

pub use firestore::Firestore;
pub use identity::FirebaseAuth;
pub use storage::FirebaseStorage;

use crate::config;
use crate::ports::{ProviderError, Result, ToTransport};

const IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const STORAGE_URL: &str = "https://firebasestorage.googleapis.com/v0";
const DEFAULT_DATABASE: &str = "(default)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the three adapters sharing one HTTP client.
pub fn connect(
    config: &config::Firebase,
) -> reqwest::Result<(FirebaseAuth, Firestore, FirebaseStorage)> {
    let http = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let auth = FirebaseAuth::new(
        http.clone(),
        &config.api_key,
        endpoint(config.identity_url.as_deref(), IDENTITY_URL),
        endpoint(config.token_url.as_deref(), TOKEN_URL),
    )
    .request_uri(config.idp_request_uri.clone());
    let documents = Firestore::new(
        http.clone(),
        endpoint(config.firestore_url.as_deref(), FIRESTORE_URL),
        &config.project_id,
        config.database.as_deref().unwrap_or(DEFAULT_DATABASE),
    );
    let files = FirebaseStorage::new(
        http,
        endpoint(config.storage_url.as_deref(), STORAGE_URL),
        &config.storage_bucket,
    );

    Ok((auth, documents, files))
}

fn endpoint(custom: Option<&str>, default: &str) -> String {
    custom.unwrap_or(default).trim_end_matches('/').to_owned()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Pass successful responses through, classify the others.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.catch()?;
    let err = classify(status, &body);
    tracing::debug!(%status, error = ?err, "firebase request refused");

    Err(err)
}

/// Map a Firebase error body to a [`ProviderError`].
///
/// Identity Toolkit puts its code in `message`, sometimes followed by a
/// description (`WEAK_PASSWORD : Password should be...`). Firestore and
/// Storage use the gRPC `status`.
fn classify(status: StatusCode, body: &str) -> ProviderError {
    let (message, grpc_status) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (String::new(), String::new()),
    };
    let code = message
        .split([' ', ':'])
        .next()
        .unwrap_or_default();

    match code {
        "EMAIL_NOT_FOUND" => ProviderError::UserNotFound,
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            ProviderError::InvalidCredentials
        },
        "EMAIL_EXISTS" => ProviderError::EmailExists,
        "WEAK_PASSWORD" => ProviderError::WeakPassword,
        "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" | "INVALID_REFRESH_TOKEN"
        | "USER_NOT_FOUND" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            ProviderError::SessionExpired
        },
        _ => match (grpc_status.as_str(), status) {
            ("PERMISSION_DENIED", _) | (_, StatusCode::FORBIDDEN) => {
                ProviderError::PermissionDenied
            },
            ("UNAUTHENTICATED", _) | (_, StatusCode::UNAUTHORIZED) => {
                ProviderError::SessionExpired
            },
            _ if message.is_empty() => ProviderError::Rejected(status.to_string()),
            _ => ProviderError::Rejected(message),
        },
    }
}
