//! Profile screen.
//!
//! Mounted in `Fetching`: [`ProfileScreen::load`] reads the stored record to
//! fill the form defaults before the form accepts submissions. Saving runs
//! photo upload, identity update and record merge in that order. They are
//! independent calls; a failure after the upload leaves the uploaded photo
//! unreferenced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{Phase, Screen, ScreenError, ScreenState, Submission};
use crate::form::ProfileForm;
use crate::identity::{Identity, IdentityChanges};
use crate::profile::{PhotoError, PhotoUpload, ProfileRecord, ProfileUpdate};
use crate::session::{AuthError, Session};
use crate::store::ProfileStore;

pub const PROFILE_SAVED: &str = "Profile updated successfully.";

/// Rendered profile screen: transient state plus the form defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub state: ScreenState,
    pub form: ProfileForm,
}

#[derive(Default)]
struct Draft {
    defaults: ProfileForm,
    /// Whether `defaults` reflect the stored record. Until then a save sends
    /// only the submitted fields.
    loaded: bool,
    photo: Option<PhotoUpload>,
}

pub struct ProfileScreen {
    screen: Screen,
    session: Session,
    store: ProfileStore,
    draft: Arc<Mutex<Draft>>,
}

fn lock(draft: &Mutex<Draft>) -> MutexGuard<'_, Draft> {
    draft.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Defaults shown when the identity has no record yet.
fn fallback(identity: &Identity) -> ProfileForm {
    ProfileForm {
        username: Some(identity.display_name.clone().unwrap_or_default()),
        date_of_birth: Some(String::new()),
        mobile_number: Some(String::new()),
        address: Some(String::new()),
    }
}

fn defaults(record: ProfileRecord) -> ProfileForm {
    ProfileForm {
        username: Some(record.username),
        date_of_birth: Some(record.date_of_birth),
        mobile_number: Some(record.mobile_number),
        address: Some(record.address),
    }
}

impl ProfileScreen {
    pub fn mount(session: Session, store: ProfileStore) -> Self {
        Self {
            screen: Screen::new("profile", Phase::Fetching),
            session,
            store,
            draft: Arc::new(Mutex::new(Draft::default())),
        }
    }

    /// Fetch the stored record and make the form interactive.
    pub fn load(&self) -> JoinHandle<()> {
        let screen = self.screen.clone();
        let draft = self.draft.clone();
        let session = self.session.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            let Some(principal) = session.principal() else {
                screen.update(|state| {
                    state.phase = Phase::Failed;
                    state.error = AuthError::NotSignedIn.user_message().to_owned();
                });
                return;
            };

            let fetched = store.fetch(&principal).await;
            if !screen.is_mounted() {
                tracing::debug!(screen = "profile", "screen unmounted, record dropped");
                return;
            }

            let (form, error) = match fetched {
                Ok(Some(record)) => (defaults(record), None),
                Ok(None) => (fallback(&principal.identity), None),
                Err(err) => (fallback(&principal.identity), Some(err.user_message())),
            };
            {
                let mut draft = lock(&draft);
                draft.defaults = form;
                draft.loaded = error.is_none();
            }
            screen.update(|state| {
                state.preview = principal.identity.photo_url.clone();
                match error {
                    Some(message) => {
                        state.phase = Phase::Failed;
                        state.error = message.to_owned();
                    },
                    None => state.phase = Phase::Idle,
                }
            });
        })
    }

    pub fn render(&self) -> ProfileView {
        ProfileView {
            state: self.screen.render(),
            form: lock(&self.draft).defaults.clone(),
        }
    }

    pub fn unmount(&self) {
        self.screen.unmount();
    }

    /// Check a selected file and show it as preview.
    ///
    /// Nothing is uploaded until the form is submitted.
    pub fn select_photo(
        &self,
        filename: &str,
        content_type: &str,
        bytes: impl Into<bytes::Bytes>,
    ) -> Result<(), PhotoError> {
        match PhotoUpload::new(filename, content_type, bytes) {
            Ok(photo) => {
                let preview = photo.data_url();
                lock(&self.draft).photo = Some(photo);
                self.screen.update(|state| {
                    state.preview = Some(preview);
                    state.field_errors.remove("photo");
                    state.error.clear();
                });
                Ok(())
            },
            Err(err) => {
                self.screen.update(|state| {
                    state.field_errors.insert("photo".to_owned(), err.to_string());
                });
                Err(err)
            },
        }
    }

    pub fn submit(&self, form: ProfileForm) -> Result<Submission, ScreenError> {
        self.screen.begin()?;

        // Fields left out keep the stored value: the one shown once the record
        // is loaded, untouched otherwise.
        let mut merged = {
            let draft = lock(&self.draft);
            if draft.loaded {
                draft.defaults.clone()
            } else {
                ProfileForm::default()
            }
        };
        merged.merge(&form);
        let update = match merged.accept() {
            Ok(update) => update,
            Err(errors) => return Ok(self.screen.reject(errors)),
        };

        let completion = self.screen.submitting();
        let photo = lock(&self.draft).photo.clone();
        let draft = self.draft.clone();
        let session = self.session.clone();
        let store = self.store.clone();

        Ok(Submission::Dispatched(tokio::spawn(async move {
            match save(&session, &store, update, photo.as_ref()).await {
                Ok(photo_url) => {
                    if completion.is_live() {
                        let mut draft = lock(&draft);
                        draft.defaults.merge(&merged);
                        if photo_url.is_some() {
                            draft.photo = None;
                        }
                    }
                    completion.succeed(|state| {
                        if photo_url.is_some() {
                            state.preview = photo_url;
                        }
                        state.success = PROFILE_SAVED.to_owned();
                    });
                },
                Err(message) => completion.fail(message),
            }
        })))
    }
}

/// Upload, identity update, record merge. Returns the new photo URL, if any.
async fn save(
    session: &Session,
    store: &ProfileStore,
    mut update: ProfileUpdate,
    photo: Option<&PhotoUpload>,
) -> Result<Option<String>, &'static str> {
    let principal = session
        .principal()
        .ok_or(AuthError::NotSignedIn.user_message())?;

    let photo_url = match photo {
        Some(photo) => Some(
            store
                .upload_photo(&principal, photo)
                .await
                .map_err(|err| err.user_message())?,
        ),
        None => None,
    };

    let changes = IdentityChanges {
        display_name: update.username.clone(),
        photo_url: photo_url.clone(),
    };
    session
        .update_identity(&changes)
        .await
        .map_err(|err| err.user_message())?;

    update.photo_url.clone_from(&photo_url);
    store
        .save(&principal, update)
        .await
        .map_err(|err| err.user_message())?;

    Ok(photo_url)
}

impl Drop for ProfileScreen {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{EmailAddress, Password};
    use crate::ports::Document;
    use crate::screen::tests::{EMAIL, Fixture, PASSWORD, fixture};
    use crate::store::COLLECTION;

    async fn signed_in() -> (Fixture, Identity) {
        let fixture = fixture().await;
        let identity = fixture
            .session
            .sign_in(&EmailAddress::parse(EMAIL).unwrap(), &Password::new(PASSWORD))
            .await
            .unwrap();
        (fixture, identity)
    }

    async fn mounted(fixture: &Fixture) -> ProfileScreen {
        let screen = ProfileScreen::mount(fixture.session.clone(), fixture.store.clone());
        screen.load().await.unwrap();
        screen
    }

    #[tokio::test]
    async fn test_absent_record_falls_back_to_display_name() {
        let (fixture, _) = signed_in().await;
        let screen = ProfileScreen::mount(fixture.session.clone(), fixture.store.clone());
        assert_eq!(screen.render().state.phase, Phase::Fetching);
        assert_eq!(screen.submit(ProfileForm::default()).unwrap_err(), ScreenError::Busy);

        screen.load().await.unwrap();
        let view = screen.render();
        assert_eq!(view.state.phase, Phase::Idle);
        assert!(view.state.error.is_empty());
        assert_eq!(view.form.username.as_deref(), Some("Jane"));
        assert_eq!(view.form.date_of_birth.as_deref(), Some(""));
        assert_eq!(view.form.mobile_number.as_deref(), Some(""));
        assert_eq!(view.form.address.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_existing_record_fills_defaults() {
        let (fixture, identity) = signed_in().await;
        let mut document = Document::new();
        document.insert("username".into(), "jdoe".into());
        document.insert("address".into(), "1 Main St".into());
        fixture
            .documents
            .insert(COLLECTION, identity.id.as_str(), document);

        let view = mounted(&fixture).await.render();
        assert_eq!(view.form.username.as_deref(), Some("jdoe"));
        assert_eq!(view.form.address.as_deref(), Some("1 Main St"));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_form_usable() {
        let (fixture, _) = signed_in().await;
        fixture.documents.fail_reads(true);

        let screen = mounted(&fixture).await;
        let view = screen.render();
        assert_eq!(view.state.error, "Failed to load profile.");
        assert_eq!(view.form.username.as_deref(), Some("Jane"));
        assert_eq!(screen.render().state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_save_after_fetch_failure_keeps_stored_fields() {
        let (fixture, identity) = signed_in().await;
        let mut document = Document::new();
        document.insert("username".into(), "jdoe".into());
        document.insert("dateOfBirth".into(), "1990-01-01".into());
        document.insert("mobileNumber".into(), "+33612345678".into());
        fixture
            .documents
            .insert(COLLECTION, identity.id.as_str(), document);
        fixture.documents.fail_reads(true);

        let screen = mounted(&fixture).await;
        assert_eq!(screen.render().state.error, "Failed to load profile.");
        fixture.documents.fail_reads(false);

        screen
            .submit(ProfileForm {
                address: Some("X".into()),
                ..Default::default()
            })
            .unwrap()
            .settled()
            .await
            .unwrap();
        assert_eq!(screen.render().state.success, PROFILE_SAVED);

        let record = fixture
            .documents
            .document(COLLECTION, identity.id.as_str())
            .unwrap();
        assert_eq!(record["address"], "X");
        assert_eq!(record["username"], "jdoe");
        assert_eq!(record["dateOfBirth"], "1990-01-01");
        assert_eq!(record["mobileNumber"], "+33612345678");
        assert_eq!(
            fixture.session.state().identity().unwrap().display_name.as_deref(),
            Some("Jane")
        );
    }

    #[tokio::test]
    async fn test_save_merges_with_previous_values() {
        let (fixture, identity) = signed_in().await;
        let screen = mounted(&fixture).await;

        screen
            .submit(ProfileForm {
                username: Some("Yann".into()),
                ..Default::default()
            })
            .unwrap()
            .settled()
            .await
            .unwrap();
        screen
            .submit(ProfileForm {
                address: Some("X".into()),
                ..Default::default()
            })
            .unwrap()
            .settled()
            .await
            .unwrap();

        let view = screen.render();
        assert_eq!(view.state.success, PROFILE_SAVED);
        assert_eq!(view.form.username.as_deref(), Some("Yann"));
        assert_eq!(view.form.address.as_deref(), Some("X"));

        let record = fixture
            .documents
            .document(COLLECTION, identity.id.as_str())
            .unwrap();
        assert_eq!(record["username"], "Yann");
        assert_eq!(record["address"], "X");
        assert_eq!(record["email"], EMAIL);
        assert_eq!(
            fixture.session.state().identity().unwrap().display_name.as_deref(),
            Some("Yann")
        );
    }

    #[tokio::test]
    async fn test_oversized_photo_is_rejected_locally() {
        let (fixture, _) = signed_in().await;
        let screen = mounted(&fixture).await;

        let err = screen
            .select_photo("big.png", "image/png", vec![0u8; 6 * 1000 * 1000])
            .unwrap_err();
        assert!(matches!(err, PhotoError::TooLarge { .. }));
        let view = screen.render();
        assert_eq!(view.state.field_errors["photo"], "File size must be less than 5MB.");
        assert_eq!(view.state.preview, None);

        screen
            .submit(ProfileForm::default())
            .unwrap()
            .settled()
            .await
            .unwrap();
        assert_eq!(fixture.files.uploads(), 0);
    }

    #[tokio::test]
    async fn test_photo_becomes_preview() {
        let (fixture, identity) = signed_in().await;
        let screen = mounted(&fixture).await;

        screen
            .select_photo("me.png", "image/png", vec![7u8; 2 * 1000 * 1000])
            .unwrap();
        let preview = screen.render().state.preview.unwrap();
        assert!(preview.starts_with("data:image/png;base64,"));
        assert_eq!(fixture.files.uploads(), 0);

        screen
            .submit(ProfileForm::default())
            .unwrap()
            .settled()
            .await
            .unwrap();

        let url = format!(
            "memory://profileImages/{}/1700000000000-me.png",
            identity.id
        );
        let view = screen.render();
        assert_eq!(view.state.preview.as_deref(), Some(url.as_str()));
        assert_eq!(fixture.files.uploads(), 1);
        assert_eq!(
            fixture.session.state().identity().unwrap().photo_url.as_deref(),
            Some(url.as_str())
        );
        let record = fixture
            .documents
            .document(COLLECTION, identity.id.as_str())
            .unwrap();
        assert_eq!(record["photoUrl"], url.as_str());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_uploaded_photo() {
        let (fixture, _) = signed_in().await;
        let screen = mounted(&fixture).await;
        fixture.documents.fail_writes(true);

        screen.select_photo("me.png", "image/png", vec![7u8; 64]).unwrap();
        screen
            .submit(ProfileForm::default())
            .unwrap()
            .settled()
            .await
            .unwrap();

        let view = screen.render();
        assert_eq!(view.state.error, "Failed to update profile.");
        assert!(view.state.success.is_empty());
        assert_eq!(fixture.files.uploads(), 1);
        assert_eq!(screen.render().state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_invalid_fields_are_not_saved() {
        let (fixture, _) = signed_in().await;
        let screen = mounted(&fixture).await;

        let submission = screen
            .submit(ProfileForm {
                mobile_number: Some("12ab".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(submission.is_rejected());
        assert_eq!(fixture.documents.writes(), 0);
        assert_eq!(screen.render().form.mobile_number.as_deref(), Some(""));
    }
}
