//! Shared helpers used across Linden components.

pub mod fs;
pub mod id;

pub use self::fs::dir_size;
pub use self::id::{shard_for_id, stable_hash};
