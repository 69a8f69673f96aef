//! Role resolution for the signed-in identity.
//!
//! Every fetch is issued under a ticket carrying a generation number. `begin` and
//! `clear_role` bump the generation, so a fetch that completes after a newer fetch was
//! started, or after sign-out, is dropped instead of overwriting the newer state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::principal::Identity;
use super::role::Role;
use super::session::Session;
use crate::error::RoleFetchError;

/// Backend that knows the role of the caller holding `session`.
#[async_trait]
pub trait RoleBackend: Send + Sync {
    async fn fetch_role(&self, session: &Session) -> Result<Role, RoleFetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleState {
    /// Identity id the current role (or in-flight fetch) belongs to.
    pub subject: Option<String>,
    pub role: Option<Role>,
    pub loading: bool,
}

#[derive(Debug)]
pub struct FetchTicket {
    generation: u64,
    subject: String,
}

impl FetchTicket {
    pub fn subject(&self) -> &str { &self.subject }
}

#[derive(Default)]
struct Inner {
    generation: u64,
    state: RoleState,
}

pub struct RoleResolver {
    backend: Arc<dyn RoleBackend>,
    inner: RwLock<Inner>,
    tx: watch::Sender<RoleState>,
}

impl RoleResolver {
    pub fn new(backend: Arc<dyn RoleBackend>) -> Self {
        let (tx, _rx) = watch::channel(RoleState::default());
        Self { backend, inner: RwLock::new(Inner::default()), tx }
    }

    /// Receiver that observes every role state change.
    pub fn watch(&self) -> watch::Receiver<RoleState> { self.tx.subscribe() }

    pub fn state(&self) -> RoleState { self.inner.read().state.clone() }
    pub fn role(&self) -> Option<Role> { self.inner.read().state.role }
    pub fn is_loading(&self) -> bool { self.inner.read().state.loading }

    /// Invalidate whatever is known or in flight and mark a fetch for `identity` as pending.
    pub fn begin(&self, identity: &Identity) -> FetchTicket {
        let mut g = self.inner.write();
        g.generation += 1;
        g.state = RoleState { subject: Some(identity.id.clone()), role: None, loading: true };
        self.tx.send_replace(g.state.clone());
        FetchTicket { generation: g.generation, subject: identity.id.clone() }
    }

    /// Perform the fetch for a ticket from `begin`. Returns the role only if it was accepted.
    pub async fn run(&self, ticket: FetchTicket, session: &Session) -> Option<Role> {
        let result = self.backend.fetch_role(session).await;
        let accepted = match &result { Ok(r) => Some(*r), Err(_) => None };
        if self.complete(ticket, result) { accepted } else { None }
    }

    /// Record a fetch outcome. Failures resolve to no role and are only logged.
    /// Returns false when the ticket is stale and the outcome was discarded.
    pub fn complete(&self, ticket: FetchTicket, result: Result<Role, RoleFetchError>) -> bool {
        let mut g = self.inner.write();
        if g.generation != ticket.generation {
            debug!(target: "dojo::role", "discarding stale role result for {} (gen {} != {})", ticket.subject, ticket.generation, g.generation);
            return false;
        }
        let role = match result {
            Ok(r) => {
                info!(target: "dojo::role", "role for {} resolved to {}", ticket.subject, r);
                Some(r)
            }
            Err(e) => {
                warn!(target: "dojo::role", "failed to fetch role for {}: {}", ticket.subject, e);
                None
            }
        };
        g.state.role = role;
        g.state.loading = false;
        self.tx.send_replace(g.state.clone());
        true
    }

    pub async fn resolve_role(&self, session: &Session) -> Option<Role> {
        let ticket = self.begin(&session.identity);
        self.run(ticket, session).await
    }

    /// Drop the role synchronously; any in-flight fetch becomes stale.
    pub fn clear_role(&self) {
        let mut g = self.inner.write();
        g.generation += 1;
        g.state = RoleState::default();
        self.tx.send_replace(g.state.clone());
    }

    /// Like `clear_role`, but the identity stays the subject: it is still signed in and
    /// now holds no permissions until the next fetch.
    pub fn revoke_role(&self) {
        let mut g = self.inner.write();
        g.generation += 1;
        g.state.role = None;
        g.state.loading = false;
        self.tx.send_replace(g.state.clone());
    }

    /// Re-run resolution for `current`, or clear when nobody is signed in.
    pub async fn refetch_role(&self, current: Option<&Session>) -> Option<Role> {
        match current {
            Some(s) => self.resolve_role(s).await,
            None => {
                self.clear_role();
                None
            }
        }
    }
}

/// Outcome a `StaticRoleBackend` hands out for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRole {
    Role(Role),
    HttpStatus(u16),
}

/// Role table keyed by email. Backs offline runs and tests; fetches for an email can be
/// held open to force out-of-order completion.
#[derive(Default)]
pub struct StaticRoleBackend {
    roles: RwLock<HashMap<String, StaticRole>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    calls: AtomicUsize,
}

impl StaticRoleBackend {
    pub fn new() -> Self { Self::default() }

    pub fn with_role(self, email: &str, role: Role) -> Self {
        self.set(email, StaticRole::Role(role));
        self
    }

    pub fn set(&self, email: &str, outcome: StaticRole) {
        self.roles.write().insert(email.to_ascii_lowercase(), outcome);
    }

    /// Hold the next fetch for `email` until the returned handle is notified.
    pub fn hold(&self, email: &str) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        self.holds.lock().insert(email.to_ascii_lowercase(), n.clone());
        n
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl RoleBackend for StaticRoleBackend {
    async fn fetch_role(&self, session: &Session) -> Result<Role, RoleFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let email = session.identity.email.clone().unwrap_or_default().to_ascii_lowercase();
        let hold = self.holds.lock().remove(&email);
        if let Some(h) = hold { h.notified().await; }
        match self.roles.read().get(&email).copied() {
            Some(StaticRole::Role(r)) => Ok(r),
            Some(StaticRole::HttpStatus(status @ (401 | 403))) => Err(RoleFetchError::Unauthorized(status)),
            Some(StaticRole::HttpStatus(status)) => Err(RoleFetchError::Status { status, detail: "API request failed".into() }),
            None => Ok(Role::None),
        }
    }
}
