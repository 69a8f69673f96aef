//! Root auth service: owns the session store and role resolver, wires identity changes
//! to role fetches, and hands the gate a consistent snapshot.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use super::gate::{decide, AccessState, Decision, Requirement};
use super::principal::Identity;
use super::provider::{AuthChange, IdentityProvider};
use super::resolver::{FetchTicket, RoleBackend, RoleResolver};
use super::role::Role;
use super::session::{ChangeCause, Session, SessionChange, SessionStore};
use super::subscription::Subscription;
use crate::error::{AuthResult, RoleFetchError};

pub struct AuthContext {
    store: Arc<SessionStore>,
    resolver: Arc<RoleResolver>,
    _role_hook: Subscription,
}

impl AuthContext {
    pub fn new(provider: Arc<dyn IdentityProvider>, backend: Arc<dyn RoleBackend>) -> Arc<Self> {
        let store = Arc::new(SessionStore::new(provider));
        let resolver = Arc::new(RoleResolver::new(backend));
        let hook = {
            let resolver = resolver.clone();
            store.subscribe(move |change| on_session_change(&resolver, change))
        };
        Arc::new(Self { store, resolver, _role_hook: hook })
    }

    pub fn store(&self) -> &Arc<SessionStore> { &self.store }
    pub fn resolver(&self) -> &Arc<RoleResolver> { &self.resolver }

    /// Listen to provider events and restore any persisted session. The returned
    /// subscription stops the event pump; release it when the consumer goes away.
    pub async fn start(&self) -> AuthResult<Subscription> {
        let provider = self.store.provider().clone();
        let mut rx = provider.subscribe();
        let store = self.store.clone();
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => { store.apply_event(change); }
                    Err(RecvError::Lagged(n)) => {
                        warn!(target: "dojo::session", "missed {} auth events; resyncing from provider", n);
                        let change = match provider.current_session() {
                            Some(s) => AuthChange::SignedIn(s),
                            None => AuthChange::SignedOut,
                        };
                        store.apply_event(change);
                    }
                    Err(RecvError::Closed) => {
                        debug!(target: "dojo::session", "auth event stream closed");
                        break;
                    }
                }
            }
        });
        let abort = pump.abort_handle();
        self.store.initialize().await?;
        Ok(Subscription::new(move || abort.abort()))
    }

    /// Snapshot for the gate. A role is only reported for the identity it was fetched
    /// for; until the fetch for the current identity has been issued the role reads as
    /// still loading.
    pub fn state(&self) -> AccessState {
        let session_loading = self.store.is_loading();
        let identity = self.store.identity();
        let role = self.resolver.state();
        match identity {
            None => AccessState { session_loading, identity: None, role_loading: false, role: None },
            Some(id) if role.subject.as_deref() == Some(id.id.as_str()) => AccessState {
                session_loading,
                identity: Some(id),
                role_loading: role.loading,
                role: if role.loading { None } else { role.role },
            },
            Some(id) => AccessState { session_loading, identity: Some(id), role_loading: true, role: None },
        }
    }

    pub fn session(&self) -> Option<Session> { self.store.session() }
    pub fn identity(&self) -> Option<Identity> { self.store.identity() }
    pub fn role(&self) -> Option<Role> { self.state().role }

    pub fn guard(&self, required: Requirement) -> Decision { decide(&self.state(), required) }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        self.store.sign_in(email, password).await
    }

    /// Sign out. If the provider refuses, the session stays but its role is dropped so
    /// privileged views close anyway.
    pub async fn sign_out(&self) -> AuthResult<()> {
        match self.store.sign_out().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "dojo::auth", "sign-out failed ({}); dropping role, keeping session", e.code_str());
                self.resolver.revoke_role();
                Err(e)
            }
        }
    }

    pub async fn refetch_role(&self) -> Option<Role> {
        let current = self.store.session();
        self.resolver.refetch_role(current.as_ref()).await
    }

    /// Wait until the role for the current identity is no longer loading.
    pub async fn role_settled(&self) -> Option<Role> {
        let mut rx = self.resolver.watch();
        loop {
            let st = self.state();
            if !st.session_loading && !st.role_loading { return st.role; }
            if rx.changed().await.is_err() { return self.state().role; }
        }
    }

    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        self.store.subscribe(on_change)
    }
}

fn on_session_change(resolver: &Arc<RoleResolver>, change: &SessionChange) {
    match &change.current {
        None => resolver.clear_role(),
        Some(s) => {
            // Only a token rotation for the identity whose role is already known skips the fetch.
            let known = resolver.state().subject.as_deref() == Some(s.identity.id.as_str());
            let rotation = change.cause == ChangeCause::TokenRefreshed && !change.identity_changed();
            if !(rotation && known) {
                let ticket = resolver.begin(&s.identity);
                spawn_fetch(resolver.clone(), ticket, s.clone());
            }
        }
    }
}

fn spawn_fetch(resolver: Arc<RoleResolver>, ticket: FetchTicket, session: Session) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn(async move {
                resolver.run(ticket, &session).await;
            });
        }
        Err(_) => {
            error!(target: "dojo::role", "no async runtime to fetch role for {}", ticket.subject());
            resolver.complete(ticket, Err(RoleFetchError::Network("no async runtime".into())));
        }
    }
}
