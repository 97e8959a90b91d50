use serde::{Deserialize, Serialize};

use super::{MentorId, ProductId};

/// Read-only catalog descriptor an event may be created from.
///
/// Its lists are snapshotted into the event at creation time; later catalog
/// edits do not reach existing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Default `required_mentor_count` for events created from this product.
    pub min_mentor_count: u32,
    pub approved_mentors: Vec<MentorId>,
    pub required_traits: Vec<String>,
}
