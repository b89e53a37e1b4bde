//! # quarry-core
//!
//! The trust boundary between the model and the user's data.
//!
//! This crate provides:
//! - The four boundary traits (`DataBackend`, `AccessPolicy`, `AuditSink`, `ArgumentVerifier`)
//!   plus the `ConversationSink` append seam
//! - The `ToolExecutor` that wires them together in the correct trust order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quarry_core::{CallContext, ToolExecutor};
//!
//! let executor = ToolExecutor::new(policy, audit, verifier);
//! let result = executor.execute_call(&ctx, &tool_call).await?;
//! ```

pub mod executor;
pub mod traits;

pub use executor::{CallContext, ToolExecutor};
