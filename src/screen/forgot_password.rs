//! Password reset request screen.

use super::{Phase, Screen, ScreenError, ScreenState, Submission};
use crate::form::ForgotPasswordForm;
use crate::session::Session;

/// Shown whether or not an account exists for the address.
pub const RESET_SENT: &str =
    "If an account exists for this email, a password reset link has been sent.";

pub struct ForgotPasswordScreen {
    screen: Screen,
    session: Session,
}

impl ForgotPasswordScreen {
    pub fn mount(session: Session) -> Self {
        Self {
            screen: Screen::new("forgot_password", Phase::Idle),
            session,
        }
    }

    pub fn render(&self) -> ScreenState {
        self.screen.render()
    }

    pub fn unmount(&self) {
        self.screen.unmount();
    }

    pub fn submit(&self, form: ForgotPasswordForm) -> Result<Submission, ScreenError> {
        self.screen.begin()?;
        let email = match form.accept() {
            Ok(email) => email,
            Err(errors) => return Ok(self.screen.reject(errors)),
        };

        let completion = self.screen.submitting();
        let session = self.session.clone();
        Ok(Submission::Dispatched(tokio::spawn(async move {
            match session.reset_password(&email).await {
                Ok(()) => completion.succeed(|state| state.success = RESET_SENT.to_owned()),
                Err(err) => completion.fail(err.user_message()),
            }
        })))
    }
}

impl Drop for ForgotPasswordScreen {
    fn drop(&mut self) {
        self.unmount();
    }
}
