//! # quarry-verify
//!
//! Tool argument verification for the quarry runtime.
//!
//! This crate provides [`engine::ToolArgumentVerifier`], which implements the
//! [`quarry_core::traits::ArgumentVerifier`] trait. It validates the decoded
//! arguments of every tool call in two phases:
//!
//! 1. **Structural**: JSON Schema validation via the `jsonschema` crate,
//!    against the parameters each tool advertises to the model.
//! 2. **Semantic**: named rules that JSON Schema cannot express, such as a
//!    date range whose start falls after its end.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use quarry_contracts::tool::ToolName;
//! use quarry_verify::engine::ToolArgumentVerifier;
//!
//! let mut verifier = ToolArgumentVerifier::new()?;
//! verifier.register_rule(ToolName::QueryCollection, "small-pages", Box::new(|args| {
//!     match args.pointer("/filters/limit").and_then(|v| v.as_u64()) {
//!         Some(n) if n > 500 => Some(format!("limit {} is above 500", n)),
//!         _ => None,
//!     }
//! }));
//! ```

pub mod engine;

pub use engine::ToolArgumentVerifier;
