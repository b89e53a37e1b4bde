//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. canonical JSON of the entry (serde_json, no pretty-printing)

use sha2::{Digest, Sha256};

use quarry_contracts::execution::AuditLogEntry;

use crate::event::AuditRecord;

/// Compute the SHA-256 hash for one audit record.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_entry(sequence: u64, entry: &AuditLogEntry, prev_hash: &str) -> String {
    // AuditLogEntry holds only strings, ids, bools and a timestamp, all of
    // which serialize infallibly.
    let entry_json = serde_json::to_vec(entry).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&entry_json);

    hex::encode(hasher.finalize())
}

/// Verify the integrity of a hash chain.
///
/// Valid when every record links to its predecessor (or `GENESIS_HASH`),
/// carries its own position as `sequence`, and has a `this_hash` matching
/// the value recomputed from its fields. An empty chain is valid.
pub fn verify_chain(records: &[AuditRecord]) -> bool {
    let mut expected_prev = AuditRecord::GENESIS_HASH.to_string();

    for (position, record) in records.iter().enumerate() {
        if record.sequence != position as u64 || record.prev_hash != expected_prev {
            return false;
        }

        let recomputed = hash_entry(record.sequence, &record.entry, &record.prev_hash);
        if record.this_hash != recomputed {
            return false;
        }

        expected_prev = record.this_hash.clone();
    }

    true
}
