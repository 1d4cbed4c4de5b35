//! Screen controllers.
//!
//! A screen owns its transient state and goes through
//! `Idle → Validating → {Failed | Submitting → {Succeeded | Failed}}`, back to
//! `Idle` once the outcome was rendered. Backend work runs on a spawned task
//! that is never cancelled; its result is applied only while the screen is
//! still mounted.

pub mod forgot_password;
pub mod login;
pub mod profile;
pub mod signup;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

pub use forgot_password::ForgotPasswordScreen;
pub use login::LoginScreen;
pub use profile::{ProfileScreen, ProfileView};
pub use signup::SignUpScreen;

use crate::form::FieldErrors;
use crate::guard::Route;

/// Shown when a submission ends without an outcome.
const UNEXPECTED_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading existing data before the form becomes interactive.
    Fetching,
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Transient, per-screen state. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenState {
    pub phase: Phase,
    /// Banner error, empty when none.
    pub error: String,
    /// Banner success message, empty when none.
    pub success: String,
    /// Submit control is disabled while set.
    pub loading: bool,
    #[serde(skip_serializing_if = "FieldErrors::is_empty")]
    pub field_errors: FieldErrors,
    /// Photo shown next to the form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    /// Where to navigate once rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Route>,
}

impl ScreenState {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            error: String::new(),
            success: String::new(),
            loading: false,
            field_errors: FieldErrors::new(),
            preview: None,
            redirect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScreenError {
    /// The submit control is disabled.
    #[error("screen is busy")]
    Busy,
}

/// What [`submit`](LoginScreen::submit) did with the input.
#[derive(Debug)]
pub enum Submission {
    /// Validation failed. Nothing was sent.
    Rejected(FieldErrors),
    /// Backend work is running.
    Dispatched(JoinHandle<()>),
}

impl Submission {
    /// Wait for the backend work, if any, to be applied.
    pub async fn settled(self) -> Result<(), JoinError> {
        match self {
            Self::Rejected(_) => Ok(()),
            Self::Dispatched(handle) => handle.await,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// State and liveness of one mounted screen.
#[derive(Clone)]
pub(crate) struct Screen {
    name: &'static str,
    state: Arc<Mutex<ScreenState>>,
    mounted: Arc<AtomicBool>,
}

impl Screen {
    pub(crate) fn new(name: &'static str, phase: Phase) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(ScreenState::new(phase))),
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScreenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> ScreenState {
        self.lock().clone()
    }

    /// Snapshot for display. A displayed outcome returns the screen to `Idle`
    /// and a displayed redirect is consumed. Messages stay until the next
    /// submission.
    pub(crate) fn render(&self) -> ScreenState {
        let mut state = self.lock();
        let snapshot = state.clone();
        if state.phase.is_terminal() {
            state.phase = Phase::Idle;
        }
        state.redirect = None;
        snapshot
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub(crate) fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            tracing::debug!(screen = self.name, "screen unmounted");
        }
    }

    /// Apply `f` only while mounted.
    pub(crate) fn update(&self, f: impl FnOnce(&mut ScreenState)) -> bool {
        if !self.is_mounted() {
            return false;
        }
        f(&mut self.lock());
        true
    }

    /// Start a submission: refuse if one is running, clear previous outcome.
    pub(crate) fn begin(&self) -> Result<(), ScreenError> {
        let mut state = self.lock();
        if state.loading
            || matches!(state.phase, Phase::Fetching | Phase::Validating)
        {
            return Err(ScreenError::Busy);
        }

        state.phase = Phase::Validating;
        state.error.clear();
        state.success.clear();
        state.field_errors.clear();
        state.redirect = None;
        Ok(())
    }

    /// End a submission on validation errors.
    pub(crate) fn reject(&self, errors: FieldErrors) -> Submission {
        tracing::debug!(screen = self.name, fields = ?errors.keys().collect::<Vec<_>>(), "validation failed");
        let mut state = self.lock();
        state.phase = Phase::Failed;
        state.loading = false;
        state.field_errors = errors.clone();

        Submission::Rejected(errors)
    }

    /// Mark the screen as waiting for the backend.
    pub(crate) fn submitting(&self) -> Completion {
        let mut state = self.lock();
        state.phase = Phase::Submitting;
        state.loading = true;

        Completion {
            screen: Some(self.clone()),
        }
    }
}

/// Applies the outcome of a submission to its screen, if still mounted.
///
/// Dropping it without an outcome (e.g. the task panicked) fails the
/// submission so the screen never stays disabled.
pub(crate) struct Completion {
    screen: Option<Screen>,
}

impl Completion {
    pub(crate) fn succeed(mut self, f: impl FnOnce(&mut ScreenState)) {
        if let Some(screen) = self.screen.take() {
            finish(&screen, Phase::Succeeded, f);
        }
    }

    pub(crate) fn fail(mut self, message: &str) {
        if let Some(screen) = self.screen.take() {
            finish(&screen, Phase::Failed, |state| {
                state.error = message.to_owned();
            });
        }
    }

    /// Whether applying an outcome would still be visible.
    pub(crate) fn is_live(&self) -> bool {
        self.screen.as_ref().is_some_and(Screen::is_mounted)
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(screen) = self.screen.take() {
            finish(&screen, Phase::Failed, |state| {
                state.error = UNEXPECTED_FAILURE.to_owned();
            });
        }
    }
}

fn finish(screen: &Screen, phase: Phase, f: impl FnOnce(&mut ScreenState)) {
    let applied = screen.update(|state| {
        state.phase = phase;
        state.loading = false;
        f(state);
    });

    if !applied {
        tracing::debug!(screen = screen.name, ?phase, "screen unmounted, outcome dropped");
    }
}
