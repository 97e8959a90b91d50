use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Named roles an actor can hold. Role membership is managed externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Mentor,
    Staff,
    MentoringManagement,
    SuperAdmin,
}

impl Role {
    /// Every role in ascending precedence.
    pub const ALL: [Self; 4] = [
        Self::Mentor,
        Self::Staff,
        Self::MentoringManagement,
        Self::SuperAdmin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mentor => "mentor",
            Self::Staff => "staff",
            Self::MentoringManagement => "mentoring-management",
            Self::SuperAdmin => "super-admin",
        }
    }

    /// Precedence used to pick the role an actor signs in with.
    const fn precedence(self) -> u8 {
        match self {
            Self::Mentor => 0,
            Self::Staff => 1,
            Self::MentoringManagement => 2,
            Self::SuperAdmin => 3,
        }
    }

    /// Highest-precedence role in `roles`, if any.
    #[must_use]
    pub fn highest(roles: &[Self]) -> Option<Self> {
        roles.iter().copied().max_by_key(|role| role.precedence())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a role name from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role: '{got}'")]
pub struct ParseRoleError {
    pub got: String,
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "mentor" => Ok(Self::Mentor),
            "staff" => Ok(Self::Staff),
            "mentoring-management" => Ok(Self::MentoringManagement),
            "super-admin" | "superadmin" => Ok(Self::SuperAdmin),
            _ => Err(ParseRoleError { got: s.to_string() }),
        }
    }
}
