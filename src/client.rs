//! Browser contexts.
//!
//! Each browser, identified by a cookie, gets its own [`Session`] and at most
//! one mounted screen, like a single-page application would. Navigating to
//! another screen unmounts the previous one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::crypto::random_token;
use crate::ports::AuthProvider;
use crate::screen::{ForgotPasswordScreen, LoginScreen, ProfileScreen, SignUpScreen};
use crate::session::Session;
use crate::store::ProfileStore;

/// Cookie holding the client id.
pub const COOKIE_NAME: &str = "portal_sid";
const ID_LENGTH: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Mounted {
    Login(Arc<LoginScreen>),
    SignUp(Arc<SignUpScreen>),
    ForgotPassword(Arc<ForgotPasswordScreen>),
    Profile(Arc<ProfileScreen>),
}

impl Mounted {
    fn unmount(&self) {
        match self {
            Self::Login(screen) => screen.unmount(),
            Self::SignUp(screen) => screen.unmount(),
            Self::ForgotPassword(screen) => screen.unmount(),
            Self::Profile(screen) => screen.unmount(),
        }
    }
}

/// One browser context.
pub struct Client {
    id: String,
    session: Session,
    screen: Mutex<Option<Mounted>>,
    last_seen: Mutex<Instant>,
}

/// Return the mounted screen of the given kind, mounting it if needed.
macro_rules! navigate {
    ($client:expr, $variant:ident, $mount:expr) => {{
        let mut current = lock(&$client.screen);
        if let Some(Mounted::$variant(screen)) = current.as_ref() {
            (screen.clone(), false)
        } else {
            if let Some(previous) = current.take() {
                previous.unmount();
            }
            let screen = Arc::new($mount);
            *current = Some(Mounted::$variant(screen.clone()));
            (screen, true)
        }
    }};
}

impl Client {
    fn new(id: String, session: Session) -> Self {
        Self {
            id,
            session,
            screen: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    pub fn login(&self) -> Arc<LoginScreen> {
        navigate!(self, Login, LoginScreen::mount(self.session.clone())).0
    }

    pub fn signup(&self) -> Arc<SignUpScreen> {
        navigate!(self, SignUp, SignUpScreen::mount(self.session.clone())).0
    }

    pub fn forgot_password(&self) -> Arc<ForgotPasswordScreen> {
        navigate!(
            self,
            ForgotPassword,
            ForgotPasswordScreen::mount(self.session.clone())
        )
        .0
    }

    /// The profile screen and, when just mounted, its initial fetch.
    pub fn profile(
        &self,
        store: &ProfileStore,
    ) -> (Arc<ProfileScreen>, Option<JoinHandle<()>>) {
        let (screen, mounted) = navigate!(
            self,
            Profile,
            ProfileScreen::mount(self.session.clone(), store.clone())
        );
        let load = mounted.then(|| screen.load());
        (screen, load)
    }

    /// Unmount the current screen, if any.
    pub fn leave(&self) {
        if let Some(previous) = lock(&self.screen).take() {
            previous.unmount();
        }
    }
}

/// All live browser contexts.
pub struct Clients {
    auth: Arc<dyn AuthProvider>,
    refresh_margin: Duration,
    idle_timeout: Duration,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl Clients {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        refresh_margin: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            refresh_margin,
            idle_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Find the client for a cookie value, or start a new one.
    ///
    /// The boolean is `true` when a new client was created. Must run inside a
    /// Tokio runtime.
    pub fn get_or_create(&self, id: Option<&str>) -> (Arc<Client>, bool) {
        let mut clients = lock(&self.clients);
        if let Some(client) = id.and_then(|id| clients.get(id)) {
            client.touch();
            return (client.clone(), false);
        }

        let id = loop {
            let id = random_token(ID_LENGTH);
            if !clients.contains_key(&id) {
                break id;
            }
        };
        let session = Session::new(self.auth.clone(), self.refresh_margin);
        session.initialize(None);
        let client = Arc::new(Client::new(id.clone(), session));
        clients.insert(id, client.clone());
        tracing::debug!(clients = clients.len(), "browser context created");

        (client, true)
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget contexts idle for longer than the configured timeout.
    pub fn sweep(&self) -> usize {
        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|_, client| {
            let keep = client.idle_for() <= self.idle_timeout;
            if !keep {
                client.leave();
                client.session.sign_out();
            }
            keep
        });

        let evicted = before - clients.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = clients.len(), "idle browser contexts evicted");
        }
        evicted
    }

    /// Sweep periodically until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let clients = Arc::downgrade(self);
        let period = (self.idle_timeout / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match clients.upgrade() {
                    Some(clients) => {
                        clients.sweep();
                    },
                    None => return,
                }
            }
        })
    }
}
