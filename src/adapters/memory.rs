//! In-process backend.
//!
//! Behaves like the hosted services closely enough for development and tests.
//! Access tokens expire and can be revoked. Documents and files are only
//! readable and writable by the identity they belong to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::crypto::{PasswordManager, random_token};
use crate::identity::{
    AccessToken, EmailAddress, ExternalCredential, Grant, Identity, IdentityChanges,
    IdentityId, Password, RefreshToken,
};
use crate::ports::{AuthProvider, Document, DocumentStore, FileStore, ProviderError, Result};

/// Lifetime of issued access tokens unless told otherwise.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);
const TOKEN_LENGTH: usize = 48;
const ID_LENGTH: usize = 28;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable() -> ProviderError {
    ProviderError::transport(std::io::Error::other("backend unavailable"))
}

struct Account {
    identity: Identity,
    password_hash: Option<String>,
}

#[derive(Default)]
struct Accounts {
    by_id: HashMap<IdentityId, Account>,
    by_email: HashMap<EmailAddress, IdentityId>,
    access: HashMap<String, (IdentityId, Instant)>,
    refresh: HashMap<String, IdentityId>,
    resets: Vec<EmailAddress>,
}

impl Accounts {
    fn create(&mut self, email: EmailAddress, display_name: Option<String>) -> Identity {
        let id = loop {
            // Random tokens are alphanumeric and never empty.
            if let Ok(id) = IdentityId::parse(random_token(ID_LENGTH)) {
                if !self.by_id.contains_key(&id) {
                    break id;
                }
            }
        };

        let identity = Identity {
            id: id.clone(),
            email: email.clone(),
            display_name,
            photo_url: None,
        };
        self.by_email.insert(email, id.clone());
        self.by_id.insert(
            id,
            Account {
                identity: identity.clone(),
                password_hash: None,
            },
        );

        identity
    }
}

/// Authentication service kept in memory.
pub struct MemoryAuth {
    passwords: PasswordManager,
    ttl: Duration,
    accounts: Mutex<Accounts>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryAuth {
    /// Create a new [`MemoryAuth`] issuing tokens valid for [`DEFAULT_TOKEN_TTL`].
    pub fn new(passwords: PasswordManager) -> Self {
        Self {
            passwords,
            ttl: DEFAULT_TOKEN_TTL,
            accounts: Mutex::new(Accounts::default()),
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Cheap hashing parameters, for tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        let passwords = PasswordManager::new(Some(crate::config::Argon2 {
            memory_cost: 256,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .expect("valid argon2 parameters");

        Self::new(passwords)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Create an account directly, bypassing the sign-up flow.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity> {
        let email = EmailAddress::parse(email)
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;
        let hash = self
            .passwords
            .hash_password(password)
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;

        let mut accounts = lock(&self.accounts);
        if accounts.by_email.contains_key(&email) {
            return Err(ProviderError::EmailExists);
        }
        let identity = accounts.create(email, display_name.map(str::to_owned));
        if let Some(account) = accounts.by_id.get_mut(&identity.id) {
            account.password_hash = Some(hash);
        }

        Ok(identity)
    }

    /// Invalidate every token issued to `id`.
    pub fn revoke(&self, id: &IdentityId) {
        let mut accounts = lock(&self.accounts);
        accounts.access.retain(|_, (owner, _)| owner != id);
        accounts.refresh.retain(|_, owner| owner != id);
    }

    /// Identity an unexpired access token was issued to.
    pub fn owner(&self, token: &AccessToken) -> Option<IdentityId> {
        lock(&self.accounts)
            .access
            .get(token.as_str())
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(id, _)| id.clone())
    }

    /// Emails a reset message was sent to, oldest first.
    pub fn reset_requests(&self) -> Vec<EmailAddress> {
        lock(&self.accounts).resets.clone()
    }

    /// Number of requests received through [`AuthProvider`].
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following request fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn grant(&self, accounts: &mut Accounts, identity: Identity) -> Grant {
        let access_token = random_token(TOKEN_LENGTH);
        let refresh_token = random_token(TOKEN_LENGTH);
        accounts.access.insert(
            access_token.clone(),
            (identity.id.clone(), Instant::now() + self.ttl),
        );
        accounts
            .refresh
            .insert(refresh_token.clone(), identity.id.clone());

        Grant {
            identity,
            access_token: AccessToken::new(access_token),
            refresh_token: RefreshToken::new(refresh_token),
            expires_in: self.ttl,
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant> {
        self.enter()?;

        let (identity, hash) = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .by_email
                .get(email)
                .and_then(|id| accounts.by_id.get(id))
                .ok_or(ProviderError::InvalidCredentials)?;
            (account.identity.clone(), account.password_hash.clone())
        };

        let hash = hash.ok_or(ProviderError::InvalidCredentials)?;
        self.passwords
            .verify_password(password.as_str(), &hash)
            .map_err(|_| ProviderError::InvalidCredentials)?;

        let mut accounts = lock(&self.accounts);
        Ok(self.grant(&mut accounts, identity))
    }

    /// The credential's token stands for the email the provider vouches for.
    async fn sign_in_with_idp(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Grant> {
        self.enter()?;

        let token = credential.id_token.as_deref().ok_or(ProviderError::Cancelled)?;
        let email = EmailAddress::parse(token)
            .map_err(|_| ProviderError::Rejected("INVALID_IDP_RESPONSE".into()))?;

        let mut accounts = lock(&self.accounts);
        let existing = accounts
            .by_email
            .get(&email)
            .and_then(|id| accounts.by_id.get(id))
            .map(|account| account.identity.clone());
        let identity = match existing {
            Some(identity) => identity,
            None => {
                let name = email
                    .as_str()
                    .split_once('@')
                    .map(|(local, _)| local.to_owned());
                accounts.create(email, name)
            },
        };

        Ok(self.grant(&mut accounts, identity))
    }

    async fn sign_up(
        &self,
        email: &EmailAddress,
        password: &Password,
    ) -> Result<Grant> {
        self.enter()?;

        if password.as_str().chars().count() < Password::MIN_LENGTH {
            return Err(ProviderError::WeakPassword);
        }
        if lock(&self.accounts).by_email.contains_key(email) {
            return Err(ProviderError::EmailExists);
        }

        let hash = self
            .passwords
            .hash_password(password.as_str())
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;

        let mut accounts = lock(&self.accounts);
        // Another sign-up may have won while hashing.
        if accounts.by_email.contains_key(email) {
            return Err(ProviderError::EmailExists);
        }
        let identity = accounts.create(email.clone(), None);
        if let Some(account) = accounts.by_id.get_mut(&identity.id) {
            account.password_hash = Some(hash);
        }

        Ok(self.grant(&mut accounts, identity))
    }

    async fn send_password_reset(&self, email: &EmailAddress) -> Result<()> {
        self.enter()?;

        let mut accounts = lock(&self.accounts);
        if !accounts.by_email.contains_key(email) {
            return Err(ProviderError::UserNotFound);
        }
        accounts.resets.push(email.clone());
        tracing::debug!(%email, "password reset requested");

        Ok(())
    }

    async fn update_identity(
        &self,
        token: &AccessToken,
        changes: &IdentityChanges,
    ) -> Result<Identity> {
        self.enter()?;

        let id = self.owner(token).ok_or(ProviderError::SessionExpired)?;
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .by_id
            .get_mut(&id)
            .ok_or(ProviderError::UserNotFound)?;

        // An empty value removes the attribute.
        let apply = |current: &mut Option<String>, change: &Option<String>| {
            if let Some(value) = change {
                *current = Some(value.clone()).filter(|v| !v.is_empty());
            }
        };
        apply(&mut account.identity.display_name, &changes.display_name);
        apply(&mut account.identity.photo_url, &changes.photo_url);

        Ok(account.identity.clone())
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<Grant> {
        self.enter()?;

        let mut accounts = lock(&self.accounts);
        let id = accounts
            .refresh
            .remove(refresh_token.as_str())
            .ok_or(ProviderError::SessionExpired)?;
        let identity = accounts
            .by_id
            .get(&id)
            .map(|account| account.identity.clone())
            .ok_or(ProviderError::SessionExpired)?;

        Ok(self.grant(&mut accounts, identity))
    }
}

/// Key must belong to the token's identity.
fn authorize(auth: &MemoryAuth, token: &AccessToken, owner: &str) -> Result<()> {
    match auth.owner(token) {
        Some(id) if id.as_str() == owner => Ok(()),
        Some(_) => Err(ProviderError::PermissionDenied),
        None => Err(ProviderError::SessionExpired),
    }
}

/// Document database kept in memory.
pub struct MemoryDocuments {
    auth: Arc<MemoryAuth>,
    documents: Mutex<HashMap<(String, String), Document>>,
    writes: AtomicUsize,
    failing_reads: AtomicBool,
    failing_writes: AtomicBool,
}

impl MemoryDocuments {
    /// Create an empty store whose access rules follow `auth`'s tokens.
    pub fn new(auth: Arc<MemoryAuth>) -> Self {
        Self {
            auth,
            documents: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            failing_reads: AtomicBool::new(false),
            failing_writes: AtomicBool::new(false),
        }
    }

    /// Stored document, without access checks.
    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        lock(&self.documents)
            .get(&(collection.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Replace a stored document, without access checks.
    pub fn insert(&self, collection: &str, key: &str, document: Document) {
        lock(&self.documents).insert((collection.to_owned(), key.to_owned()), document);
    }

    /// Number of accepted writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn get(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        authorize(&self.auth, token, key)?;

        Ok(self.document(collection, key))
    }

    async fn merge(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        authorize(&self.auth, token, key)?;

        lock(&self.documents)
            .entry((collection.to_owned(), key.to_owned()))
            .or_default()
            .extend(fields);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

/// A stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Object store kept in memory.
///
/// Objects live under a top-level folder followed by the owner id, e.g.
/// `profileImages/{id}/...`.
pub struct MemoryFiles {
    auth: Arc<MemoryAuth>,
    base_url: String,
    files: Mutex<HashMap<String, StoredFile>>,
    failing: AtomicBool,
}

impl MemoryFiles {
    pub fn new(auth: Arc<MemoryAuth>, base_url: impl Into<String>) -> Self {
        Self {
            auth,
            base_url: base_url.into(),
            files: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn file(&self, path: &str) -> Option<StoredFile> {
        lock(&self.files).get(path).cloned()
    }

    /// Number of stored objects.
    pub fn uploads(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn fail_uploads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStore for MemoryFiles {
    async fn put(
        &self,
        token: &AccessToken,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let owner = path.split('/').nth(1).unwrap_or_default();
        authorize(&self.auth, token, owner)?;

        lock(&self.files).insert(
            path.to_owned(),
            StoredFile {
                content_type: content_type.to_owned(),
                bytes,
            },
        );

        Ok(format!("{}{}", self.base_url, path))
    }
}
