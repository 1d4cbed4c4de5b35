//! Sign-up screen.

use super::{Phase, Screen, ScreenError, ScreenState, Submission};
use crate::form::SignUpForm;
use crate::guard::Route;
use crate::session::Session;

pub struct SignUpScreen {
    screen: Screen,
    session: Session,
}

impl SignUpScreen {
    pub fn mount(session: Session) -> Self {
        Self {
            screen: Screen::new("signup", Phase::Idle),
            session,
        }
    }

    pub fn render(&self) -> ScreenState {
        self.screen.render()
    }

    pub fn unmount(&self) {
        self.screen.unmount();
    }

    /// Create the account and sign it in. Success navigates to the profile.
    pub fn submit(&self, form: SignUpForm) -> Result<Submission, ScreenError> {
        self.screen.begin()?;
        let registration = match form.accept() {
            Ok(registration) => registration,
            Err(errors) => return Ok(self.screen.reject(errors)),
        };

        let completion = self.screen.submitting();
        let session = self.session.clone();
        Ok(Submission::Dispatched(tokio::spawn(async move {
            match session
                .sign_up(&registration.email, &registration.password)
                .await
            {
                Ok(identity) => {
                    tracing::info!(user_id = %identity.id, age = registration.age, "account created");
                    completion.succeed(|state| state.redirect = Some(Route::Profile));
                },
                Err(err) => completion.fail(err.user_message()),
            }
        })))
    }
}

impl Drop for SignUpScreen {
    fn drop(&mut self) {
        self.unmount();
    }
}
