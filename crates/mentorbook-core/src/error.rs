use std::fmt;

use crate::model::{EventId, ProductId, Role};
use crate::permissions::Capability;
use crate::persist::PersistError;

/// Machine-readable error codes for UI and operator decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoRoles,
    IdentityDecodeFailed,
    EventNotFound,
    ProductNotFound,
    InvalidEvent,
    NotEligible,
    PermissionDenied,
    StaleRead,
    RemoteWriteFailure,
    RemoteReadFailure,
    SessionEnded,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoRoles => "E1001",
            Self::IdentityDecodeFailed => "E1002",
            Self::EventNotFound => "E2001",
            Self::ProductNotFound => "E2002",
            Self::InvalidEvent => "E2003",
            Self::NotEligible => "E3001",
            Self::PermissionDenied => "E3002",
            Self::StaleRead => "E4001",
            Self::RemoteWriteFailure => "E5001",
            Self::RemoteReadFailure => "E5002",
            Self::SessionEnded => "E5003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoRoles => "Actor holds no roles",
            Self::IdentityDecodeFailed => "Identity token could not be decoded",
            Self::EventNotFound => "Event not found",
            Self::ProductNotFound => "Product not found",
            Self::InvalidEvent => "Invalid event",
            Self::NotEligible => "Operation precondition failed",
            Self::PermissionDenied => "Permission denied",
            Self::StaleRead => "Event changed since it was read",
            Self::RemoteWriteFailure => "Remote write failed",
            Self::RemoteReadFailure => "Remote read failed",
            Self::SessionEnded => "Session already ended",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and users.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NoRoles => Some("Ask an administrator to grant a role to this account."),
            Self::IdentityDecodeFailed => Some("Sign in again to obtain a fresh token."),
            Self::EventNotFound | Self::NotEligible | Self::InvalidEvent => None,
            Self::ProductNotFound => Some("Pick an existing product or create the event without one."),
            Self::PermissionDenied => Some("Switch to a role that grants this capability."),
            Self::StaleRead => Some("Reload the event and retry the operation."),
            Self::RemoteWriteFailure | Self::RemoteReadFailure => {
                Some("Check the connection and retry.")
            }
            Self::SessionEnded => Some("Start a new session."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The precondition that made a request, withdrawal, or decision ineligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ineligibility {
    /// The active role cannot take part in this transition.
    WrongRole,
    AlreadyRequested,
    AlreadyAccepted,
    AlreadyDeclined,
    /// The event start lies in the past.
    EventPast,
    /// `accepted` already holds `required_mentor_count` mentors.
    EventFull,
    Locked,
    /// The mentor is not in the `requesting` set.
    NotRequesting,
}

impl Ineligibility {
    /// User-facing explanation, distinct per precondition.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::WrongRole => "Only mentors can request to join an event",
            Self::AlreadyRequested => "You have already requested this event",
            Self::AlreadyAccepted => "This mentor is already booked for the event",
            Self::AlreadyDeclined => "This request was already declined",
            Self::EventPast => "This event has already taken place",
            Self::EventFull => "This event is already full",
            Self::Locked => "This event is locked",
            Self::NotRequesting => "There is no open request from this mentor",
        }
    }
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not eligible: {0}")]
    NotEligible(Ineligibility),

    #[error("permission denied: role {role} lacks {capability}")]
    PermissionDenied { capability: Capability, role: Role },

    #[error("role {role} cannot be activated from {active}")]
    RoleNotHeld { role: Role, active: Role },

    #[error("remote write failed: {0}")]
    RemoteWriteFailure(#[source] PersistError),

    #[error("remote read failed: {0}")]
    RemoteReadFailure(#[source] PersistError),

    #[error("event {event_id} changed since read (expected version {expected}, found {found})")]
    StaleRead {
        event_id: EventId,
        expected: u64,
        found: u64,
    },

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    #[error("actor holds no roles")]
    NoRoles,

    #[error("identity token could not be decoded: {0}")]
    Identity(String),

    #[error("session has ended")]
    SessionEnded,
}

impl EngineError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotEligible(_) => ErrorCode::NotEligible,
            Self::PermissionDenied { .. } | Self::RoleNotHeld { .. } => ErrorCode::PermissionDenied,
            Self::RemoteWriteFailure(_) => ErrorCode::RemoteWriteFailure,
            Self::RemoteReadFailure(_) => ErrorCode::RemoteReadFailure,
            Self::SessionEnded => ErrorCode::SessionEnded,
            Self::StaleRead { .. } => ErrorCode::StaleRead,
            Self::EventNotFound(_) => ErrorCode::EventNotFound,
            Self::ProductNotFound(_) => ErrorCode::ProductNotFound,
            Self::InvalidEvent { .. } => ErrorCode::InvalidEvent,
            Self::NoRoles => ErrorCode::NoRoles,
            Self::Identity(_) => ErrorCode::IdentityDecodeFailed,
        }
    }

    /// Optional remediation hint for operators and users.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RoleNotHeld { .. } => Some("Sign in with an account that holds this role."),
            _ => self.code().hint(),
        }
    }

    /// Message suitable for showing to the actor who attempted the operation.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotEligible(reason) => reason.user_message().to_string(),
            Self::PermissionDenied { .. } => "You are not authorized to do this".to_string(),
            Self::RoleNotHeld { role, .. } => format!("Your account cannot act as {role}"),
            Self::StaleRead { .. } => {
                "Someone else changed this event in the meantime. Please try again".to_string()
            }
            Self::EventNotFound(_) => "This event no longer exists".to_string(),
            Self::ProductNotFound(_) => "The selected product does not exist".to_string(),
            Self::InvalidEvent { reason } => format!("Invalid event: {reason}"),
            Self::NoRoles => "Your account has no roles assigned".to_string(),
            Self::Identity(_) => "Your session could not be verified".to_string(),
            Self::RemoteWriteFailure(_) | Self::RemoteReadFailure(_) => {
                "Something went wrong. Please try again".to_string()
            }
            Self::SessionEnded => "Your session has ended. Please sign in again".to_string(),
        }
    }

    /// Classify a failed repository write.
    pub(crate) fn from_write(err: PersistError) -> Self {
        match err {
            PersistError::VersionConflict {
                event_id,
                expected,
                found,
            } => Self::StaleRead {
                event_id,
                expected,
                found,
            },
            PersistError::NotFound(event_id) => Self::EventNotFound(event_id),
            PersistError::Rejected(reason) => Self::InvalidEvent { reason },
            other => Self::RemoteWriteFailure(other),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }
}

impl From<Ineligibility> for EngineError {
    fn from(reason: Ineligibility) -> Self {
        Self::NotEligible(reason)
    }
}
