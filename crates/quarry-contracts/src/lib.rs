//! # quarry-contracts
//!
//! Shared types, tool contracts, and errors for the quarry runtime.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod access;
pub mod agent;
pub mod collection;
pub mod error;
pub mod execution;
pub mod insight;
pub mod message;
pub mod plan;
pub mod tool;
pub mod verify;
