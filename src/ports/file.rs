//! File store port.

use async_trait::async_trait;
use bytes::Bytes;

use super::Result;
use crate::identity::AccessToken;

/// Port for the external binary object store.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` under `path` and return a publicly resolvable URL.
    async fn put(
        &self,
        token: &AccessToken,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String>;
}
