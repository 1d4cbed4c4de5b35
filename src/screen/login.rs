//! Sign-in screen.

use super::{Phase, Screen, ScreenError, ScreenState, Submission};
use crate::form::SignInForm;
use crate::guard::Route;
use crate::identity::ExternalCredential;
use crate::session::Session;

pub struct LoginScreen {
    screen: Screen,
    session: Session,
}

impl LoginScreen {
    pub fn mount(session: Session) -> Self {
        Self {
            screen: Screen::new("login", Phase::Idle),
            session,
        }
    }

    pub fn render(&self) -> ScreenState {
        self.screen.render()
    }

    pub fn unmount(&self) {
        self.screen.unmount();
    }

    /// Sign in with email and password. Success navigates to the profile.
    pub fn submit(&self, form: SignInForm) -> Result<Submission, ScreenError> {
        self.screen.begin()?;
        let credentials = match form.accept() {
            Ok(credentials) => credentials,
            Err(errors) => return Ok(self.screen.reject(errors)),
        };

        let completion = self.screen.submitting();
        let session = self.session.clone();
        Ok(Submission::Dispatched(tokio::spawn(async move {
            match session
                .sign_in(&credentials.email, &credentials.password)
                .await
            {
                Ok(_) => completion.succeed(|state| state.redirect = Some(Route::Profile)),
                Err(err) => completion.fail(err.user_message()),
            }
        })))
    }

    /// Sign in with a credential from an external identity provider.
    pub fn submit_external(
        &self,
        credential: ExternalCredential,
    ) -> Result<Submission, ScreenError> {
        self.screen.begin()?;

        let completion = self.screen.submitting();
        let session = self.session.clone();
        Ok(Submission::Dispatched(tokio::spawn(async move {
            match session.sign_in_with_provider(&credential).await {
                Ok(_) => completion.succeed(|state| state.redirect = Some(Route::Profile)),
                Err(err) => completion.fail(err.user_message()),
            }
        })))
    }
}

impl Drop for LoginScreen {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::tests::{EMAIL, PASSWORD, fixture};
    use crate::session::SessionState;

    fn form(email: &str, password: &str) -> SignInForm {
        SignInForm {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_valid_credentials_redirect_to_profile() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());

        let submission = screen.submit(form(EMAIL, PASSWORD)).unwrap();
        assert!(screen.screen.snapshot().loading);
        submission.settled().await.unwrap();

        let state = screen.render();
        assert_eq!(state.phase, Phase::Succeeded);
        assert_eq!(state.redirect, Some(Route::Profile));
        assert!(state.error.is_empty());
        assert!(matches!(fixture.session.state(), SessionState::Authenticated(_)));
    }

    #[tokio::test]
    async fn test_invalid_credentials_show_one_banner() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());

        screen
            .submit(form(EMAIL, "wrong-password"))
            .unwrap()
            .settled()
            .await
            .unwrap();

        let state = screen.render();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(
            state.error,
            "Failed to sign in. Please check your email and password."
        );
        assert!(state.field_errors.is_empty());
        assert!(state.success.is_empty());
        assert_eq!(state.redirect, None);
        assert!(!state.loading);
        assert_eq!(fixture.session.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_malformed_email_makes_no_backend_call() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());
        let calls = fixture.auth.calls();

        let submission = screen.submit(form("jane.example.com", PASSWORD)).unwrap();
        assert!(submission.is_rejected());
        assert_eq!(fixture.auth.calls(), calls);

        let state = screen.render();
        assert_eq!(state.field_errors["email"], "Email must be formatted.");
        assert!(state.error.is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_loading_is_refused() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());

        let submission = screen.submit(form(EMAIL, PASSWORD)).unwrap();
        assert_eq!(
            screen.submit(form(EMAIL, PASSWORD)).unwrap_err(),
            ScreenError::Busy
        );
        submission.settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_result_after_unmount_is_dropped() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());

        let submission = screen.submit(form(EMAIL, PASSWORD)).unwrap();
        screen.unmount();
        submission.settled().await.unwrap();

        // The request still ran to completion.
        assert!(matches!(fixture.session.state(), SessionState::Authenticated(_)));
        let state = screen.render();
        assert_eq!(state.phase, Phase::Submitting);
        assert_eq!(state.redirect, None);
    }

    #[tokio::test]
    async fn test_external_provider() {
        let fixture = fixture().await;
        let screen = LoginScreen::mount(fixture.session.clone());

        screen
            .submit_external(ExternalCredential {
                provider_id: "google.com".into(),
                id_token: None,
            })
            .unwrap()
            .settled()
            .await
            .unwrap();
        assert_eq!(
            screen.render().error,
            "Failed to sign in with the external provider."
        );

        screen
            .submit_external(ExternalCredential {
                provider_id: "google.com".into(),
                id_token: Some(EMAIL.into()),
            })
            .unwrap()
            .settled()
            .await
            .unwrap();
        let state = screen.render();
        assert!(state.error.is_empty());
        assert_eq!(state.redirect, Some(Route::Profile));
    }
}
