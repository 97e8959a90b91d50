//! Derived booking status of an event.
//!
//! Status is a projection of the lock flag, the `accepted` and `requesting`
//! set sizes, and `required_mentor_count`. It is never stored, so it cannot
//! drift from the membership it summarizes.
//!
//! # Precedence
//!
//! The checks run in a fixed order and the first match wins:
//!
//! 1. `locked` flag set → [`Status::Locked`]
//! 2. `accepted >= required` → [`Status::SuccessComplete`]
//! 3. `accepted > 0` → [`Status::SuccessPartly`]
//! 4. `requesting > 0` → [`Status::FirstRequests`]
//! 5. otherwise → [`Status::New`]
//!
//! An event with both accepted and requesting mentors is therefore never
//! `firstRequests`.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::model::Event;

/// Booking lifecycle label of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    New,
    FirstRequests,
    SuccessPartly,
    SuccessComplete,
    Locked,
}

impl Status {
    pub const ALL: [Self; 5] = [
        Self::New,
        Self::FirstRequests,
        Self::SuccessPartly,
        Self::SuccessComplete,
        Self::Locked,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::FirstRequests => "firstRequests",
            Self::SuccessPartly => "successPartly",
            Self::SuccessComplete => "successComplete",
            Self::Locked => "locked",
        }
    }

    /// Whether mentors can still be booked onto the event.
    #[must_use]
    pub const fn is_bookable(self) -> bool {
        !matches!(self, Self::Locked | Self::SuccessComplete)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a status label from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status: '{got}'")]
pub struct ParseStatusError {
    pub got: String,
}

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseStatusError { got: s.to_string() })
    }
}

/// Canonical status of `event`.
#[must_use]
pub fn derive_status(event: &Event) -> Status {
    derive_status_from(
        event.locked,
        event.membership.accepted.len(),
        event.membership.requesting.len(),
        event.required_mentor_count,
    )
}

/// Status from the four inputs it depends on.
#[must_use]
pub fn derive_status_from(locked: bool, accepted: usize, requesting: usize, required: u32) -> Status {
    if locked {
        return Status::Locked;
    }

    let required = usize::try_from(required).unwrap_or(usize::MAX);
    if accepted >= required {
        Status::SuccessComplete
    } else if accepted > 0 {
        Status::SuccessPartly
    } else if requesting > 0 {
        Status::FirstRequests
    } else {
        Status::New
    }
}
