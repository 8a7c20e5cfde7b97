//! Single-generation indexing: the backend seam, near-real-time readers,
//! background commits and the [`IndexCore`] bundle tying them together.

pub mod backend;
pub mod collector;
pub mod commit;
pub mod core;
pub mod memory;
pub mod nrt;
pub mod registry;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use self::backend::{IndexReader, IndexWriter};
pub use self::core::{IndexCore, UpdateMode};
pub use self::registry::BackendRegistry;
pub use self::schema::{FieldOptions, Schema};

/// Where a generation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    /// Being built; not yet served (a hot-swap `next`).
    Pending,
    /// Serving searches.
    Live,
    /// Being swapped out or evicted.
    Retiring,
    Closed,
}

/// Point-in-time statistics of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub state: GenerationState,
    pub doc_count: u64,
    pub version: u64,
    /// Writes not yet committed.
    pub pending_changes: bool,
    pub segments: usize,
    pub ram_bytes: u64,
    pub disk_bytes: u64,
    pub open_leases: usize,
}
