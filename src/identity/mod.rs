//! Session, role and access-gate core for the portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod subscription;
mod provider;
mod gotrue;
mod role;
mod resolver;
mod gate;
mod context;

pub use principal::Identity;
pub use session::{ChangeCause, Session, SessionChange, SessionPhase, SessionStore};
pub use subscription::Subscription;
pub use provider::{AuthChange, IdentityProvider, MemoryProvider, AUTH_EVENT_CAPACITY};
pub use gotrue::GoTrueProvider;
pub use role::{satisfies, Role, UnknownRole};
pub use resolver::{FetchTicket, RoleBackend, RoleResolver, RoleState, StaticRole, StaticRoleBackend};
pub use gate::{decide, AccessState, Decision, Requirement};
pub use context::AuthContext;
