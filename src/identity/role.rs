use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend-assigned permission level. Variants are declared in rank order so the derived
/// `Ord` is the hierarchy: `Admin > Instructor > User > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    None,
    User,
    Instructor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::None, Role::User, Role::Instructor, Role::Admin];

    pub fn rank(self) -> u8 {
        match self {
            Role::None => 0,
            Role::User => 1,
            Role::Instructor => 2,
            Role::Admin => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::None => "none",
            Role::User => "user",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }
}

/// Whether a caller holding `actual` passes a check for `required`.
/// An unknown role (`None`) never passes, whatever is required.
pub fn satisfies(actual: Option<Role>, required: Role) -> bool {
    match actual {
        Some(r) => r.rank() >= required.rank(),
        None => false,
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Role::None),
            "user" => Ok(Role::User),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_linear() {
        assert!(satisfies(Some(Role::Admin), Role::Instructor));
        assert!(satisfies(Some(Role::Admin), Role::User));
        assert!(satisfies(Some(Role::Instructor), Role::User));
        assert!(satisfies(Some(Role::User), Role::User));
        assert!(!satisfies(Some(Role::User), Role::Instructor));
        assert!(!satisfies(Some(Role::Instructor), Role::Admin));
        assert!(!satisfies(Some(Role::None), Role::User));
        assert!(Role::Admin > Role::Instructor && Role::Instructor > Role::User && Role::User > Role::None);
    }

    #[test]
    fn admin_satisfies_every_requirement() {
        for r in Role::ALL {
            assert!(satisfies(Some(Role::Admin), r), "admin should satisfy {r}");
        }
    }

    #[test]
    fn unknown_role_fails_closed() {
        for r in Role::ALL {
            assert!(!satisfies(None, r));
        }
    }

    #[test]
    fn parses_backend_strings() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Instructor ".parse::<Role>().unwrap(), Role::Instructor);
        assert!("superuser".parse::<Role>().is_err());
        let r: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(r, Role::User);
    }
}
