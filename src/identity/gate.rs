//! Access decision for protected views. Pure: reads a snapshot, performs no I/O.

use serde::Serialize;

use super::principal::Identity;
use super::role::{satisfies, Role};

/// Everything the gate looks at, captured at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessState {
    pub session_loading: bool,
    pub identity: Option<Identity>,
    pub role_loading: bool,
    pub role: Option<Role>,
}

impl AccessState {
    pub fn loading() -> Self {
        Self { session_loading: true, ..Default::default() }
    }

    pub fn signed_out() -> Self { Self::default() }

    pub fn signed_in(identity: Identity, role: Option<Role>) -> Self {
        Self { session_loading: false, identity: Some(identity), role_loading: false, role }
    }
}

/// Minimum role a route asks for. `None` means any signed-in user.
pub type Requirement = Option<Role>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ShowLoading,
    RedirectToLogin,
    CheckingPermissions,
    Allow,
    RedirectToFallback,
}

impl Decision {
    pub fn is_allow(self) -> bool { matches!(self, Decision::Allow) }
}

/// First matching row wins.
pub fn decide(state: &AccessState, required: Requirement) -> Decision {
    if state.session_loading {
        return Decision::ShowLoading;
    }
    if state.identity.is_none() {
        return Decision::RedirectToLogin;
    }
    if state.role_loading {
        return Decision::CheckingPermissions;
    }
    match required {
        None => Decision::Allow,
        Some(min) if satisfies(state.role, min) => Decision::Allow,
        Some(_) => Decision::RedirectToFallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(role: Option<Role>) -> AccessState {
        AccessState::signed_in(Identity::new("u1", Some("a@dojo.test".into())), role)
    }

    #[test]
    fn loading_wins_over_everything() {
        for req in [None, Some(Role::User), Some(Role::Admin)] {
            assert_eq!(decide(&AccessState::loading(), req), Decision::ShowLoading);
            let mut st = member(Some(Role::Admin));
            st.session_loading = true;
            assert_eq!(decide(&st, req), Decision::ShowLoading);
        }
    }

    #[test]
    fn anonymous_goes_to_login() {
        for req in [None, Some(Role::None), Some(Role::Admin)] {
            assert_eq!(decide(&AccessState::signed_out(), req), Decision::RedirectToLogin);
        }
    }

    #[test]
    fn pending_role_shows_checking() {
        let mut st = member(None);
        st.role_loading = true;
        assert_eq!(decide(&st, None), Decision::CheckingPermissions);
        assert_eq!(decide(&st, Some(Role::Admin)), Decision::CheckingPermissions);
    }

    #[test]
    fn no_requirement_allows_any_member() {
        assert_eq!(decide(&member(None), None), Decision::Allow);
        assert_eq!(decide(&member(Some(Role::None)), None), Decision::Allow);
    }

    #[test]
    fn requirement_uses_hierarchy() {
        assert_eq!(decide(&member(Some(Role::Admin)), Some(Role::Admin)), Decision::Allow);
        assert_eq!(decide(&member(Some(Role::Admin)), Some(Role::User)), Decision::Allow);
        assert_eq!(decide(&member(Some(Role::Instructor)), Some(Role::User)), Decision::Allow);
        assert_eq!(decide(&member(Some(Role::Instructor)), Some(Role::Admin)), Decision::RedirectToFallback);
        assert_eq!(decide(&member(Some(Role::User)), Some(Role::Admin)), Decision::RedirectToFallback);
    }

    #[test]
    fn unknown_role_fails_closed() {
        assert_eq!(decide(&member(None), Some(Role::User)), Decision::RedirectToFallback);
        assert_eq!(decide(&member(None), Some(Role::None)), Decision::RedirectToFallback);
    }
}
