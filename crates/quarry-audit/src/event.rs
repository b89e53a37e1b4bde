//! Audit record and export types.
//!
//! `AuditRecord` is a single link in the hash chain: it wraps an
//! `AuditLogEntry` with its position and the SHA-256 hashes that make
//! tampering detectable. `AuditExport` is a snapshot of the whole chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quarry_contracts::execution::AuditLogEntry;

/// A single link in the SHA-256 hash chain.
///
/// Each record commits to the previous one via `prev_hash`. Modifying any
/// field, including those of the embedded `entry`, invalidates `this_hash`
/// and every later `prev_hash`, which `verify_chain` detects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    /// The access decision being recorded.
    pub entry: AuditLogEntry,

    /// Hash (hex) of the previous record, or `GENESIS_HASH` for the first.
    pub prev_hash: String,

    /// Hash (hex) over (sequence, prev_hash, canonical JSON of entry).
    pub this_hash: String,
}

impl AuditRecord {
    /// The `prev_hash` of the first record in every chain: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A point-in-time copy of the whole chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    /// All records in chain order (sequence 0 first).
    pub records: Vec<AuditRecord>,

    pub exported_at: DateTime<Utc>,

    /// `this_hash` of the last record. Empty if the log is empty.
    pub terminal_hash: String,
}
