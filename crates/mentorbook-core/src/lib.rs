//! mentorbook-core library.
//!
//! The assignment engine behind mentor bookings: staff publish events, mentors
//! request to join, and staff accept or decline until the required headcount
//! is met.
//!
//! # Conventions
//!
//! - **Errors**: Library operations return [`error::EngineError`]; every
//!   variant maps to a stable [`error::ErrorCode`].
//! - **Status**: never stored. Call [`status::derive_status`] or
//!   [`model::Event::status`].

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod permissions;
pub mod persist;
pub mod protocol;
pub mod push;
pub mod realtime;
pub mod session;
pub mod status;
pub mod store;

pub use error::{EngineError, ErrorCode, Ineligibility};
pub use model::{Event, EventId, MentorId, ProductId, Role, StaffId};
pub use status::{Status, derive_status};
