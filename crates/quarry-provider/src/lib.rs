//! # quarry-provider
//!
//! One chat interface over several model vendors.
//!
//! [`ProviderClient`] takes a uniform [`ChatRequest`](quarry_contracts::message::ChatRequest)
//! and returns a uniform [`ChatResponse`](quarry_contracts::message::ChatResponse).
//! [`HttpProviderClient`] translates to and from each vendor's wire format;
//! [`ScriptedProvider`] answers from a script for tests and offline runs.
//!
//! Vendors without native tool calling return `tool_calls: None`. Missing
//! keys are configuration errors and non-2xx responses carry the vendor's
//! status and body; nothing here retries.

mod anthropic;
pub mod client;
mod google;
mod openai;
pub mod scripted;
pub mod settings;

pub use client::{HttpProviderClient, ProviderClient};
pub use scripted::{RecordedCall, Responder, ScriptedProvider};
pub use settings::ProviderSettings;
