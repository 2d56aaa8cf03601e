//! Portal roles and the one authoritative role -> landing path table.
//!
//! Both the client route guard and the server's login response read from
//! here, so a role's default region is only ever declared once.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entry point unauthenticated visitors are redirected to.
pub const LOGIN_PATH: &str = "/login";

/// Query parameter carrying the path to return to after login.
pub const RETURN_URL_PARAM: &str = "returnUrl";

/// Landing path for an absent or unrecognised role.
pub const FALLBACK_LANDING_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
    Superadmin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Teacher, Role::Admin, Role::Superadmin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    /// Default region a signed-in user of this role lands on.
    pub fn landing_path(self) -> &'static str {
        match self {
            Role::Student => "/student/overview",
            Role::Teacher => "/teacher/overview",
            Role::Admin => "/management/institutional-health",
            Role::Superadmin => "/superadmin/overview",
        }
    }

    /// Roles a user may pick for themselves at registration.
    pub fn is_self_assignable(self) -> bool {
        matches!(self, Role::Student | Role::Teacher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Landing path for a role given as free text, e.g. straight from a session
/// payload. Anything unrecognised lands on the fallback path.
pub fn landing_path_for(role: Option<&str>) -> &'static str {
    role.and_then(|r| r.parse::<Role>().ok())
        .map(Role::landing_path)
        .unwrap_or(FALLBACK_LANDING_PATH)
}
