//! Cloud Storage for Firebase over its REST API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use super::check;
use crate::identity::AccessToken;
use crate::ports::{FileStore, ProviderError, Result, ToTransport};

/// [`FileStore`] backed by a Cloud Storage bucket.
pub struct FirebaseStorage {
    http: Client,
    objects_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Object {
    name: String,
    #[serde(default)]
    download_tokens: String,
}

/// Object names are a single path segment: `/` must be escaped as well.
fn encode_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

impl FirebaseStorage {
    pub fn new(http: Client, base_url: impl AsRef<str>, bucket: &str) -> Self {
        Self {
            http,
            objects_url: format!("{}/b/{bucket}/o", base_url.as_ref()),
        }
    }

    /// Public URL of an object, valid as long as its download token is.
    fn download_url(&self, object: &Object) -> String {
        let token = object
            .download_tokens
            .split(',')
            .next()
            .unwrap_or_default();

        format!(
            "{}/{}?alt=media&token={token}",
            self.objects_url,
            encode_name(&object.name)
        )
    }
}

#[async_trait]
impl FileStore for FirebaseStorage {
    async fn put(
        &self,
        token: &AccessToken,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(&self.objects_url)
            .query(&[("uploadType", "media"), ("name", path)])
            .header(AUTHORIZATION, format!("Firebase {}", token.as_str()))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .catch()?;
        let object: Object = check(response).await?.json().await.catch()?;

        if object.download_tokens.is_empty() {
            return Err(ProviderError::Rejected(
                "uploaded object has no download token".into(),
            ));
        }

        Ok(self.download_url(&object))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_encode_name() {
        assert_eq!(
            encode_name("profileImages/uid 1/1-a.png"),
            "profileImages%2Fuid%201%2F1-a.png"
        );
    }

    #[tokio::test]
    async fn test_put() {
        let server = MockServer::start().await;
        let storage = FirebaseStorage::new(
            Client::new(),
            format!("{}/v0", server.uri()),
            "demo.appspot.com",
        );
        Mock::given(method("POST"))
            .and(path("/v0/b/demo.appspot.com/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "profileImages/uid-1/1-a.png"))
            .and(header("authorization", "Firebase id-token"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "profileImages/uid-1/1-a.png",
                "bucket": "demo.appspot.com",
                "contentType": "image/png",
                "downloadTokens": "dl-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = storage
            .put(
                &AccessToken::new("id-token"),
                "profileImages/uid-1/1-a.png",
                Bytes::from_static(&[1, 2, 3]),
                "image/png",
            )
            .await
            .unwrap();
        assert_eq!(
            url,
            format!(
                "{}/v0/b/demo.appspot.com/o/profileImages%2Fuid-1%2F1-a.png?alt=media&token=dl-token",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_put_unauthorized() {
        let server = MockServer::start().await;
        let storage =
            FirebaseStorage::new(Client::new(), server.uri(), "demo.appspot.com");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Permission denied." }
            })))
            .mount(&server)
            .await;

        let err = storage
            .put(
                &AccessToken::new("id-token"),
                "profileImages/uid-2/1-a.png",
                Bytes::from_static(&[1]),
                "image/png",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied));
    }
}
