use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use super::principal::Identity;
use super::session::Session;
use crate::error::{AuthError, AuthResult};

/// Provider-driven change to the signed-in state, delivered in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl AuthChange {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthChange::SignedIn(s) | AuthChange::TokenRefreshed(s) => Some(s),
            AuthChange::SignedOut => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthChange::SignedIn(_) => "signed_in",
            AuthChange::SignedOut => "signed_out",
            AuthChange::TokenRefreshed(_) => "token_refreshed",
        }
    }
}

pub const AUTH_EVENT_CAPACITY: usize = 64;

/// External identity service. Implementations own their own copy of the session
/// (persisted or in memory) and broadcast every change they make.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Any session persisted from an earlier run.
    async fn get_session(&self) -> AuthResult<Option<Session>>;
    /// The session the provider holds right now, without I/O.
    fn current_session(&self) -> Option<Session>;
    /// Receiver for every later change; dropping it unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session>;
    async fn sign_out(&self) -> AuthResult<()>;
}

/// Opaque bearer token: 32 bytes from the OS RNG, base64url without padding.
pub(crate) fn gen_token() -> AuthResult<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| AuthError::provider(format!("no randomness for session token: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct FailPoints {
    get_session: Option<AuthError>,
    sign_in: Option<AuthError>,
    sign_out: Option<AuthError>,
}

/// In-process identity provider with a seeded account table. Used for offline runs and
/// for driving the session lifecycle in tests, including scripted failures and
/// provider-initiated events.
pub struct MemoryProvider {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Session>>,
    fail: Mutex<FailPoints>,
    get_session_gate: Mutex<Option<Arc<Notify>>>,
    get_session_calls: AtomicUsize,
    ttl: Duration,
    tx: broadcast::Sender<AuthChange>,
}

impl Default for MemoryProvider {
    fn default() -> Self { Self::new() }
}

impl MemoryProvider {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            fail: Mutex::new(FailPoints::default()),
            get_session_gate: Mutex::new(None),
            get_session_calls: AtomicUsize::new(0),
            ttl: Duration::hours(1),
            tx,
        }
    }

    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = Identity::new(uuid::Uuid::new_v4().to_string(), Some(email.to_string()));
        self.accounts.write().insert(
            email.to_ascii_lowercase(),
            Account { identity: identity.clone(), password: password.to_string() },
        );
        identity
    }

    /// Pretend a session survived from a previous run, without emitting an event.
    pub fn seed_session(&self, email: &str) -> AuthResult<Session> {
        let acct = self.account(email).ok_or_else(|| AuthError::provider(format!("no account for {email}")))?;
        let s = self.issue(&acct.identity)?;
        *self.current.write() = Some(s.clone());
        Ok(s)
    }

    pub fn get_session_calls(&self) -> usize { self.get_session_calls.load(Ordering::SeqCst) }

    pub fn fail_next_get_session(&self, err: AuthError) { self.fail.lock().get_session = Some(err); }
    pub fn fail_next_sign_in(&self, err: AuthError) { self.fail.lock().sign_in = Some(err); }
    pub fn fail_next_sign_out(&self, err: AuthError) { self.fail.lock().sign_out = Some(err); }

    /// Hold the next `get_session` until the returned handle is notified.
    pub fn gate_get_session(&self) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        *self.get_session_gate.lock() = Some(n.clone());
        n
    }

    /// Provider-initiated sign-in (e.g. another tab), announced on the event stream.
    pub fn push_sign_in(&self, email: &str) -> AuthResult<Session> {
        let acct = self.account(email).ok_or_else(|| AuthError::provider(format!("no account for {email}")))?;
        let s = self.issue(&acct.identity)?;
        *self.current.write() = Some(s.clone());
        self.emit(AuthChange::SignedIn(s.clone()));
        Ok(s)
    }

    /// Provider-side expiry: the session is gone and listeners hear `SignedOut`.
    pub fn expire(&self) {
        *self.current.write() = None;
        self.emit(AuthChange::SignedOut);
    }

    /// Rotate tokens for the current identity.
    pub fn refresh(&self) -> AuthResult<Session> {
        let identity = self.current.read().as_ref().map(|s| s.identity.clone())
            .ok_or_else(|| AuthError::provider("no session to refresh"))?;
        let s = self.issue(&identity)?;
        *self.current.write() = Some(s.clone());
        self.emit(AuthChange::TokenRefreshed(s.clone()));
        Ok(s)
    }

    pub fn emit(&self, change: AuthChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(change);
    }

    fn account(&self, email: &str) -> Option<Account> {
        self.accounts.read().get(&email.to_ascii_lowercase()).cloned()
    }

    fn issue(&self, identity: &Identity) -> AuthResult<Session> {
        Ok(Session {
            identity: identity.clone(),
            access_token: gen_token()?,
            refresh_token: Some(gen_token()?),
            expires_at: Some(Utc::now() + self.ttl),
        })
    }
}

#[async_trait]
impl IdentityProvider for MemoryProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.get_session_gate.lock().take();
        if let Some(g) = gate { g.notified().await; }
        if let Some(e) = self.fail.lock().get_session.take() { return Err(e); }
        Ok(self.current.read().clone().filter(|s| !s.is_expired()))
    }

    fn current_session(&self) -> Option<Session> { self.current.read().clone() }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> { self.tx.subscribe() }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        if let Some(e) = self.fail.lock().sign_in.take() { return Err(e); }
        let acct = match self.account(email) {
            Some(a) if a.password == password => a,
            _ => return Err(AuthError::invalid_credentials("Invalid login credentials")),
        };
        let s = self.issue(&acct.identity)?;
        *self.current.write() = Some(s.clone());
        debug!(target: "dojo::auth", "memory provider issued session for {}", acct.identity.id);
        self.emit(AuthChange::SignedIn(s.clone()));
        Ok(s)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        if let Some(e) = self.fail.lock().sign_out.take() { return Err(e); }
        *self.current.write() = None;
        self.emit(AuthChange::SignedOut);
        Ok(())
    }
}
