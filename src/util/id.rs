//! Stable hashing of document ids and routing keys.
//!
//! Every node must agree on where an id lives, so routing uses 64-bit
//! FNV-1a rather than a per-process randomized hasher.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of `key`, identical on every node and every run.
pub fn stable_hash(key: &str) -> u64 {
    key.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

/// Shard owning document `id` when the writer did not name one.
pub fn shard_for_id(id: &str, num_shards: u32) -> u32 {
    if num_shards == 0 {
        return 0;
    }
    (stable_hash(id) % num_shards as u64) as u32
}

/// Slot in `0..slots` for a replica-affinity key.
pub fn slot_for_key(key: &str, slots: usize) -> usize {
    if slots == 0 {
        return 0;
    }
    (stable_hash(key) % slots as u64) as usize
}
