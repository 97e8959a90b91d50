//! Domain model: events, membership sets, roles, and catalog products.

pub mod event;
pub mod product;
pub mod role;

pub use event::{Event, EventDraft, MembershipColumn, MembershipSets, Mentor, Schedule};
pub use product::Product;
pub use role::{ParseRoleError, Role};

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identity string as-is.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Opaque identity of a bookable event.
    EventId
);
string_id!(
    /// Mentor identity. Membership sets hold these by reference only.
    MentorId
);
string_id!(
    /// Staff identity listed in an event's `staff_members`.
    StaffId
);
string_id!(
    /// Catalog product identity.
    ProductId
);
