//! Profile store.
//!
//! Every operation takes a [`Principal`] and addresses the record keyed by its
//! identity id. There is no way to read or write another identity's record
//! through this type.

use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::Value;

use crate::identity::Principal;
use crate::ports::{Clock, DocumentStore, FileStore, ProviderError};
use crate::profile::{PhotoUpload, ProfileRecord, ProfileUpdate};

/// Collection holding one profile record per identity.
pub const COLLECTION: &str = "users";
/// Top-level folder of uploaded profile photos.
pub const PHOTO_FOLDER: &str = "profileImages";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("profile could not be read")]
    FetchFailed(#[source] ProviderError),
    #[error("photo upload failed")]
    UploadFailed(#[source] ProviderError),
    #[error("profile could not be saved")]
    PersistenceFailed(#[source] ProviderError),
}

impl StorageError {
    /// Generic message shown to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::FetchFailed(_) => "Failed to load profile.",
            Self::UploadFailed(_) => "Failed to upload photo.",
            Self::PersistenceFailed(_) => "Failed to update profile.",
        }
    }
}

#[derive(Clone)]
pub struct ProfileStore {
    documents: Arc<dyn DocumentStore>,
    files: Arc<dyn FileStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        files: Arc<dyn FileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            files,
            clock,
        }
    }

    /// Read the principal's record. A missing record is `Ok(None)`.
    pub async fn fetch(
        &self,
        principal: &Principal,
    ) -> Result<Option<ProfileRecord>, StorageError> {
        let document = self
            .documents
            .get(&principal.token, COLLECTION, principal.identity.id.as_str())
            .await
            .map_err(StorageError::FetchFailed)?;

        document
            .map(ProfileRecord::from_document)
            .transpose()
            .map_err(|err| StorageError::FetchFailed(ProviderError::transport(err)))
    }

    /// Write the present fields of `update`, keeping the others.
    ///
    /// The identity email and the save time are written along.
    pub async fn save(
        &self,
        principal: &Principal,
        update: ProfileUpdate,
    ) -> Result<(), StorageError> {
        let mut fields = update.into_document();
        fields.insert(
            "email".to_owned(),
            Value::String(principal.identity.email.to_string()),
        );
        fields.insert(
            "lastUpdated".to_owned(),
            Value::String(
                self.clock
                    .now()
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );

        self.documents
            .merge(
                &principal.token,
                COLLECTION,
                principal.identity.id.as_str(),
                fields,
            )
            .await
            .map_err(|err| {
                tracing::warn!(
                    user_id = %principal.identity.id,
                    error = ?err,
                    "profile save failed"
                );
                StorageError::PersistenceFailed(err)
            })
    }

    /// Store a photo and return its resolvable URL.
    ///
    /// The record is not touched: a failure saving it afterwards leaves the
    /// object in place.
    pub async fn upload_photo(
        &self,
        principal: &Principal,
        photo: &PhotoUpload,
    ) -> Result<String, StorageError> {
        let path = format!(
            "{PHOTO_FOLDER}/{}/{}-{}",
            principal.identity.id,
            self.clock.now_millis(),
            photo.filename()
        );

        let url = self
            .files
            .put(&principal.token, &path, photo.bytes(), photo.content_type())
            .await
            .map_err(|err| {
                tracing::warn!(
                    user_id = %principal.identity.id,
                    error = ?err,
                    "photo upload failed"
                );
                StorageError::UploadFailed(err)
            })?;

        tracing::debug!(user_id = %principal.identity.id, %path, size = photo.len(), "photo uploaded");
        Ok(url)
    }
}
