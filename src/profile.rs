//! Profile record kept in the document store, one per identity.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::Document;

/// Largest accepted photo: 5 MiB.
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;
/// Content types accepted as profile photos.
pub const ACCEPTED_IMAGE_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// This application's own data about a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRecord {
    pub username: String,
    pub date_of_birth: String,
    pub mobile_number: String,
    pub address: String,
    pub photo_url: Option<String>,
    /// Copy of the identity email at last save.
    pub email: String,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Read a stored document, ignoring unknown fields.
    pub fn from_document(
        document: Document,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(document))
    }
}

/// Partial update: `None` leaves the stored field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub date_of_birth: Option<String>,
    pub mobile_number: Option<String>,
    pub address: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    /// Document holding only the fields present in this update.
    pub fn into_document(self) -> Document {
        let mut document = Document::new();
        let fields = [
            ("username", self.username),
            ("dateOfBirth", self.date_of_birth),
            ("mobileNumber", self.mobile_number),
            ("address", self.address),
            ("photoUrl", self.photo_url),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                document.insert(name.to_owned(), value.into());
            }
        }
        document
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reasons a selected photo is refused before any upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhotoError {
    #[error("File size must be less than 5MB.")]
    TooLarge { size: usize },
    #[error("Only JPEG, PNG, GIF and WEBP images are accepted.")]
    UnsupportedType { content_type: String },
    #[error("Selected file is empty.")]
    Empty,
}

/// A photo that passed the local checks and may be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUpload {
    filename: String,
    content_type: String,
    bytes: Bytes,
}

impl PhotoUpload {
    /// Check type and size of a selected file.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file is empty, larger than [`MAX_PHOTO_BYTES`] or
    /// not one of [`ACCEPTED_IMAGE_TYPES`].
    pub fn new(
        filename: impl AsRef<str>,
        content_type: impl AsRef<str>,
        bytes: impl Into<Bytes>,
    ) -> Result<Self, PhotoError> {
        let bytes = bytes.into();
        let content_type = content_type.as_ref().trim().to_ascii_lowercase();

        if !ACCEPTED_IMAGE_TYPES.contains(&content_type.as_str()) {
            return Err(PhotoError::UnsupportedType { content_type });
        }
        if bytes.is_empty() {
            return Err(PhotoError::Empty);
        }
        if bytes.len() > MAX_PHOTO_BYTES {
            return Err(PhotoError::TooLarge { size: bytes.len() });
        }

        Ok(Self {
            filename: sanitize_filename(filename.as_ref()),
            content_type,
            bytes,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Inline `data:` URL used as preview before upload.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

/// Keep the last path component and drop characters that would break a
/// storage key.
fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    if name.trim_matches('.').is_empty() {
        "photo".to_owned()
    } else {
        name
    }
}
