//! # quarry-audit
//!
//! Immutable, append-only, SHA-256 hash-chained access audit log for the
//! quarry runtime.
//!
//! ## Overview
//!
//! Every tool-call attempt the executor records is wrapped in an
//! `AuditRecord` that links to the previous record via its SHA-256 hash.
//! Tampering with any record breaks the chain and is detected by
//! `verify_chain`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quarry_audit::InMemoryAuditLog;
//! use quarry_contracts::execution::ListAuditLogsParams;
//!
//! let log = InMemoryAuditLog::new();
//! // hand `Arc::new(log.clone())` to the ToolExecutor, then later:
//! let recent = log.list_audit_logs_by_agent(&ListAuditLogsParams::new("agent-1", "user-1"));
//! assert!(log.verify_integrity());
//! ```

pub mod chain;
pub mod event;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use event::{AuditExport, AuditRecord};
pub use memory::InMemoryAuditLog;

// ── Tests ─────────────────────────────────────────────────────────────────────
