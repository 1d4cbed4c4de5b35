//! Document store port.

use async_trait::async_trait;

use super::Result;
use crate::identity::AccessToken;

/// A schemaless document, field name to JSON value.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Port for the external document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. A missing document is `Ok(None)`.
    async fn get(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>>;

    /// Write `fields` into the document, creating it if needed.
    ///
    /// Fields absent from `fields` keep their stored value.
    async fn merge(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<()>;
}
