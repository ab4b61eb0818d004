//! Identifier types and table sizing constants shared across the stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default capacity of the content store.
pub const DEFAULT_CS_CAPACITY: usize = 4096;

/// Unique identifier for a face.
///
/// Allocated by the link layer and stable for the lifetime of the face.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FaceId(pub u32);

/// Face id reserved for "from the application/higher layer".
pub const FACE_LOCAL: FaceId = FaceId(0);

impl FaceId {
    /// Whether this is the reserved local/application marker.
    pub fn is_local(&self) -> bool {
        *self == FACE_LOCAL
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceId({})", self.0)
    }
}
