use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::principal::Identity;
use super::provider::{AuthChange, IdentityProvider};
use super::subscription::Subscription;
use crate::error::AuthResult;

/// Live binding of an identity to this process. Tokens are opaque to the core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }

    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    SignedOut,
    SignedIn,
}

/// What put the store into its new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Restored,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl From<&AuthChange> for ChangeCause {
    fn from(change: &AuthChange) -> Self {
        match change {
            AuthChange::SignedIn(_) => ChangeCause::SignedIn,
            AuthChange::SignedOut => ChangeCause::SignedOut,
            AuthChange::TokenRefreshed(_) => ChangeCause::TokenRefreshed,
        }
    }
}

/// What a listener is told after the store changed.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub cause: ChangeCause,
    pub previous: Option<Identity>,
    pub current: Option<Session>,
}

impl SessionChange {
    pub fn identity_changed(&self) -> bool {
        self.previous.as_ref().map(|i| i.id.as_str()) != self.current.as_ref().map(|s| s.identity.id.as_str())
    }
}

type Listener = Arc<dyn Fn(&SessionChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

struct StoreState {
    phase: SessionPhase,
    session: Option<Session>,
}

/// Single source of truth for who is signed in. Provider events and explicit
/// sign-in/sign-out calls are the only writers.
pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    state: RwLock<StoreState>,
    init_started: AtomicBool,
    listeners: Arc<Mutex<Listeners>>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            state: RwLock::new(StoreState { phase: SessionPhase::Uninitialized, session: None }),
            init_started: AtomicBool::new(false),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> { &self.provider }

    pub fn phase(&self) -> SessionPhase { self.state.read().phase }

    /// True until the first provider answer (or event) has settled the phase.
    pub fn is_loading(&self) -> bool {
        matches!(self.phase(), SessionPhase::Uninitialized | SessionPhase::Loading)
    }

    pub fn session(&self) -> Option<Session> { self.state.read().session.clone() }

    pub fn identity(&self) -> Option<Identity> {
        self.state.read().session.as_ref().map(|s| s.identity.clone())
    }

    /// Restore any persisted session from the provider. Runs once; later calls return the
    /// current session without asking the provider again. A failed lookup settles to
    /// signed-out, and a provider event that lands first wins over the late answer.
    pub async fn initialize(&self) -> AuthResult<Option<Session>> {
        if self.init_started.swap(true, Ordering::SeqCst) {
            warn!(target: "dojo::session", "initialize called more than once; ignoring");
            return Ok(self.session());
        }
        {
            let mut st = self.state.write();
            if st.phase == SessionPhase::Uninitialized { st.phase = SessionPhase::Loading; }
        }
        let restored = match self.provider.get_session().await {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "dojo::session", "session restore failed ({}): {}", e.code_str(), e);
                None
            }
        };
        let change = {
            let mut st = self.state.write();
            if st.phase != SessionPhase::Loading {
                debug!(target: "dojo::session", "session restore superseded by provider event");
                return Ok(st.session.clone());
            }
            st.phase = if restored.is_some() { SessionPhase::SignedIn } else { SessionPhase::SignedOut };
            st.session = restored.clone();
            SessionChange { cause: ChangeCause::Restored, previous: None, current: restored.clone() }
        };
        match &restored {
            Some(s) => info!(target: "dojo::session", "session restored for {}", s.identity.display_name()),
            None => info!(target: "dojo::session", "no session to restore"),
        }
        self.notify(&change);
        Ok(restored)
    }

    /// Apply a change the caller already knows to be current (an explicit call's result).
    /// Returns `None` when the change carried the session the store already holds.
    pub fn apply(&self, change: AuthChange) -> Option<SessionChange> {
        self.apply_with(change, false)
    }

    /// Apply a change delivered on the provider's event stream. Events that no longer
    /// match the provider's current session were superseded, typically by an explicit
    /// call already applied, and are skipped.
    pub fn apply_event(&self, change: AuthChange) -> Option<SessionChange> {
        self.apply_with(change, true)
    }

    fn apply_with(&self, change: AuthChange, must_be_current: bool) -> Option<SessionChange> {
        let applied = {
            let mut st = self.state.write();
            let next = change.session().cloned();
            if must_be_current && self.provider.current_session() != next {
                debug!(target: "dojo::session", "skipping superseded {} event", change.kind());
                return None;
            }
            let settled = matches!(st.phase, SessionPhase::SignedIn | SessionPhase::SignedOut);
            if settled && st.session == next {
                return None;
            }
            let previous = st.session.as_ref().map(|s| s.identity.clone());
            st.phase = if next.is_some() { SessionPhase::SignedIn } else { SessionPhase::SignedOut };
            st.session = next.clone();
            SessionChange { cause: ChangeCause::from(&change), previous, current: next }
        };
        debug!(target: "dojo::session", "applied {} (identity_changed={})", change.kind(), applied.identity_changed());
        self.notify(&applied);
        Some(applied)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        info!(target: "dojo::auth", "signed in as {}", session.identity.display_name());
        self.apply(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    /// Sign out with the provider. The local session is only cleared once the provider
    /// confirmed it.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.provider.sign_out().await?;
        info!(target: "dojo::auth", "signed out");
        self.apply(AuthChange::SignedOut);
        Ok(())
    }

    /// Register a callback for every later change.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        let id = {
            let mut l = self.listeners.lock();
            let id = l.next_id;
            l.next_id += 1;
            l.entries.push((id, Arc::new(on_change)));
            id
        };
        let weak: Weak<Mutex<Listeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(l) = weak.upgrade() {
                l.lock().entries.retain(|(i, _)| *i != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize { self.listeners.lock().entries.len() }

    fn notify(&self, change: &SessionChange) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let snapshot: Vec<Listener> = self.listeners.lock().entries.iter().map(|(_, l)| l.clone()).collect();
        for l in snapshot { l(change); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provider::MemoryProvider;
    use std::sync::atomic::AtomicUsize;

    fn store_with(provider: MemoryProvider) -> (Arc<MemoryProvider>, SessionStore) {
        let p = Arc::new(provider);
        let store = SessionStore::new(p.clone());
        (p, store)
    }

    #[tokio::test]
    async fn starts_loading_and_settles_signed_out() {
        let (_p, store) = store_with(MemoryProvider::new());
        assert_eq!(store.phase(), SessionPhase::Uninitialized);
        assert!(store.is_loading());
        let restored = store.initialize().await.unwrap();
        assert!(restored.is_none());
        assert_eq!(store.phase(), SessionPhase::SignedOut);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn restores_persisted_session() {
        let p = MemoryProvider::new();
        p.add_account("sensei@dojo.test", "kata");
        p.seed_session("sensei@dojo.test").unwrap();
        let (_p, store) = store_with(p);
        let restored = store.initialize().await.unwrap();
        assert_eq!(restored.unwrap().identity.email.as_deref(), Some("sensei@dojo.test"));
        assert_eq!(store.phase(), SessionPhase::SignedIn);
    }

    #[tokio::test]
    async fn second_initialize_does_not_requery() {
        let (p, store) = store_with(MemoryProvider::new());
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(p.get_session_calls(), 1);
    }

    #[tokio::test]
    async fn failed_restore_settles_signed_out() {
        let p = MemoryProvider::new();
        p.fail_next_get_session(crate::error::AuthError::network("offline"));
        let (_p, store) = store_with(p);
        assert!(store.initialize().await.unwrap().is_none());
        assert_eq!(store.phase(), SessionPhase::SignedOut);
    }

    #[tokio::test]
    async fn duplicate_sign_in_event_is_ignored() {
        let p = MemoryProvider::new();
        p.add_account("a@dojo.test", "pw");
        let (_p, store) = store_with(p);
        store.initialize().await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = store.subscribe(move |_| { h.fetch_add(1, Ordering::SeqCst); });
        let s = store.sign_in("a@dojo.test", "pw").await.unwrap();
        assert!(store.apply_event(AuthChange::SignedIn(s)).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changes_carry_their_cause() {
        let p = MemoryProvider::new();
        p.add_account("a@dojo.test", "pw");
        let (p, store) = store_with(p);
        store.initialize().await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = store.subscribe(move |c| log.lock().push((c.cause, c.identity_changed())));
        store.sign_in("a@dojo.test", "pw").await.unwrap();
        let refreshed = p.refresh().unwrap();
        store.apply_event(AuthChange::TokenRefreshed(refreshed));
        let again = p.sign_in_with_password("a@dojo.test", "pw").await.unwrap();
        store.apply(AuthChange::SignedIn(again));
        assert_eq!(
            *seen.lock(),
            vec![
                (ChangeCause::SignedIn, true),
                (ChangeCause::TokenRefreshed, false),
                (ChangeCause::SignedIn, false),
            ]
        );
    }

    #[tokio::test]
    async fn superseded_event_is_skipped() {
        let p = MemoryProvider::new();
        p.add_account("a@dojo.test", "pw");
        let (_p, store) = store_with(p);
        store.initialize().await.unwrap();
        let s = store.sign_in("a@dojo.test", "pw").await.unwrap();
        store.sign_out().await.unwrap();
        // The sign-in echo arrives after the sign-out was already applied.
        assert!(store.apply_event(AuthChange::SignedIn(s)).is_none());
        assert_eq!(store.phase(), SessionPhase::SignedOut);
        assert!(store.session().is_none());
    }

    #[tokio::test]
    async fn released_subscription_stops_callbacks() {
        let p = MemoryProvider::new();
        p.add_account("a@dojo.test", "pw");
        let (_p, store) = store_with(p);
        store.initialize().await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = store.subscribe(move |_| { h.fetch_add(1, Ordering::SeqCst); });
        assert_eq!(store.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.listener_count(), 0);
        store.sign_in("a@dojo.test", "pw").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_sign_out_keeps_session() {
        let p = MemoryProvider::new();
        p.add_account("a@dojo.test", "pw");
        let (p, store) = store_with(p);
        store.initialize().await.unwrap();
        store.sign_in("a@dojo.test", "pw").await.unwrap();
        p.fail_next_sign_out(crate::error::AuthError::network("offline"));
        let err = store.sign_out().await.unwrap_err();
        assert_eq!(err.kind, crate::error::AuthErrorKind::NetworkError);
        assert_eq!(store.phase(), SessionPhase::SignedIn);
        assert!(store.session().is_some());
    }

    #[test]
    fn debug_redacts_tokens() {
        let s = Session {
            identity: Identity::new("u1", Some("a@dojo.test".into())),
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
            expires_at: None,
        };
        let text = format!("{s:?}");
        assert!(!text.contains("secret"));
    }
}
