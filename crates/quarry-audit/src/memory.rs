//! In-memory implementation of `AuditSink`.
//!
//! `InMemoryAuditLog` is the reference implementation of the `AuditSink`
//! trait. It keeps every record in a `Vec` behind a `Mutex`, so one log can
//! be shared by all concurrent turns while operators query it.
//!
//! Use `list_audit_logs_by_agent()` for the operator view,
//! `export_log()` for a full snapshot, and `verify_integrity()` at any time
//! to confirm the chain has not been tampered with in memory.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    execution::{AuditLogEntry, ListAuditLogsParams},
};
use quarry_core::traits::AuditSink;

use crate::{
    chain::{hash_entry, verify_chain},
    event::{AuditExport, AuditRecord},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct InMemoryState {
    /// All records written so far, in append order.
    pub(crate) records: Vec<AuditRecord>,

    /// The `this_hash` of the last record, or `GENESIS_HASH` before any
    /// record has been written.
    pub(crate) last_hash: String,
}

// ── Public log ────────────────────────────────────────────────────────────────

/// An in-memory, append-only audit log backed by a SHA-256 hash chain.
#[derive(Clone)]
pub struct InMemoryAuditLog {
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        let state = InMemoryState {
            records: Vec::new(),
            last_hash: AuditRecord::GENESIS_HASH.to_string(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Read access for queries. A poisoned lock still holds a consistent
    /// chain because every write completes before releasing it.
    fn read(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Entries for one agent and user, newest first.
    ///
    /// Filters by `params.kind` when given and returns at most
    /// `params.limit` entries.
    pub fn list_audit_logs_by_agent(&self, params: &ListAuditLogsParams) -> Vec<AuditLogEntry> {
        let state = self.read();
        state
            .records
            .iter()
            .rev()
            .map(|r| &r.entry)
            .filter(|e| e.agent_id == params.agent_id && e.user_id == params.user_id)
            .filter(|e| params.kind.map_or(true, |k| e.kind == k))
            .take(params.limit)
            .cloned()
            .collect()
    }

    /// All entries written while `turn_id` was running, in write order.
    pub fn entries_for_turn(&self, turn_id: &str) -> Vec<AuditLogEntry> {
        self.read()
            .records
            .iter()
            .filter(|r| r.entry.turn_id == turn_id)
            .map(|r| r.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the whole chain.
    pub fn export_log(&self) -> AuditExport {
        let state = self.read();
        let terminal_hash = state
            .records
            .last()
            .map(|r| r.this_hash.clone())
            .unwrap_or_default();

        AuditExport {
            records: state.records.clone(),
            exported_at: Utc::now(),
            terminal_hash,
        }
    }

    /// Verify that the in-memory chain has not been tampered with.
    pub fn verify_integrity(&self) -> bool {
        verify_chain(&self.read().records)
    }
}

// ── AuditSink impl ────────────────────────────────────────────────────────────

impl AuditSink for InMemoryAuditLog {
    /// Append one entry to the hash chain.
    ///
    /// Returns `Err(AuditWriteFailed)` only if the internal mutex is
    /// poisoned.
    fn record(&self, entry: &AuditLogEntry) -> QuarryResult<()> {
        let mut state = self.state.lock().map_err(|e| QuarryError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })?;

        let prev_hash = state.last_hash.clone();
        let sequence = state.records.len() as u64;
        let this_hash = hash_entry(sequence, entry, &prev_hash);

        debug!(
            sequence,
            agent_id = %entry.agent_id,
            tool = %entry.tool,
            allowed = entry.allowed,
            "audit entry recorded"
        );

        state.records.push(AuditRecord {
            sequence,
            entry: entry.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.last_hash = this_hash;

        Ok(())
    }

    /// Log the turn's entry count and the current chain head.
    fn finalize(&self, turn_id: &str) -> QuarryResult<()> {
        let state = self.state.lock().map_err(|e| QuarryError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })?;

        let turn_entries = state
            .records
            .iter()
            .filter(|r| r.entry.turn_id == turn_id)
            .count();
        info!(
            turn_id = %turn_id,
            turn_entries,
            chain_length = state.records.len(),
            terminal_hash = %state.last_hash,
            "audit turn finalized"
        );

        Ok(())
    }
}
