//! Site map of the portal and the per-route guard wrapper.

use serde::Serialize;
use tracing::debug;

use crate::config::PortalConfig;
use crate::identity::{decide, AccessState, Decision, Requirement, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Public,
    Member,
    Admin,
}

/// Guard placed in front of a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteGuard {
    pub min_role: Requirement,
}

impl RouteGuard {
    /// Any signed-in user.
    pub fn authenticated() -> Self { Self { min_role: None } }

    pub fn new(min_role: Requirement) -> Self { Self { min_role } }

    pub fn require(role: Role) -> Self { Self { min_role: Some(role) } }

    pub fn check(&self, state: &AccessState) -> Decision { decide(state, self.min_role) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub pattern: &'static str,
    pub title: &'static str,
    pub area: Area,
    pub guard: Option<RouteGuard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation<'a> {
    Render(&'a RouteEntry),
    Redirect(String),
    Placeholder(&'static str),
    NotFound,
}

pub const LOADING_TEXT: &str = "Loading...";
pub const CHECKING_TEXT: &str = "Checking permissions...";

pub struct SiteMap {
    routes: Vec<RouteEntry>,
}

impl Default for SiteMap {
    fn default() -> Self { Self::portal() }
}

impl SiteMap {
    pub fn new(routes: Vec<RouteEntry>) -> Self { Self { routes } }

    /// Public pages, the member area and the admin area of the school portal.
    pub fn portal() -> Self {
        let public = |pattern, title| RouteEntry { pattern, title, area: Area::Public, guard: None };
        let member = |pattern, title| RouteEntry { pattern, title, area: Area::Member, guard: Some(RouteGuard::authenticated()) };
        let admin = |pattern, title| RouteEntry { pattern, title, area: Area::Admin, guard: Some(RouteGuard::require(Role::Admin)) };
        Self::new(vec![
            public("/", "Home"),
            public("/schedule", "Schedule"),
            public("/calendar", "Calendar"),
            public("/team", "Team"),
            public("/about", "About"),
            public("/contact", "Contact"),
            public("/login", "Member Login"),
            member("/member", "Member Dashboard"),
            member("/member/details", "Student Details"),
            member("/member/promotions", "Promotions"),
            member("/member/awards", "Awards"),
            member("/member/contacts", "Contacts"),
            admin("/admin", "Admin Dashboard"),
            admin("/admin/people", "People"),
            admin("/admin/enrol", "Enrol New Student"),
            admin("/admin/users", "User Accounts"),
            admin("/admin/classes", "Classes"),
            admin("/admin/promotions", "Promotions"),
            admin("/admin/awards", "Awards"),
            admin("/admin/events", "Events"),
            admin("/admin/contacts", "Contacts"),
            admin("/admin/students", "Student List"),
            admin("/admin/students/:id", "Student Detail"),
        ])
    }

    pub fn routes(&self) -> &[RouteEntry] { &self.routes }

    pub fn resolve(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| matches_pattern(r.pattern, path))
    }

    /// What a visitor in `state` gets when opening `path`.
    pub fn navigate(&self, path: &str, state: &AccessState, cfg: &PortalConfig) -> Navigation<'_> {
        let Some(route) = self.resolve(path) else { return Navigation::NotFound };
        let Some(guard) = route.guard else { return Navigation::Render(route) };
        let decision = guard.check(state);
        debug!(target: "dojo::gate", "{} -> {:?}", path, decision);
        match decision {
            Decision::Allow => Navigation::Render(route),
            Decision::ShowLoading => Navigation::Placeholder(LOADING_TEXT),
            Decision::CheckingPermissions => Navigation::Placeholder(CHECKING_TEXT),
            Decision::RedirectToLogin => Navigation::Redirect(cfg.login_path.clone()),
            Decision::RedirectToFallback => Navigation::Redirect(cfg.member_home.clone()),
        }
    }
}

fn segments(p: &str) -> Vec<&str> {
    p.split('?').next().unwrap_or("").split('/').filter(|s| !s.is_empty()).collect()
}

/// Exact segments; `:name` matches any single non-empty segment; trailing `/` ignored.
fn matches_pattern(pattern: &str, path: &str) -> bool {
    let pat = segments(pattern);
    let got = segments(path);
    pat.len() == got.len() && pat.iter().zip(got.iter()).all(|(p, g)| p.starts_with(':') || p == g)
}
