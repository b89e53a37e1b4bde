//! Access decision and context types.
//!
//! The access policy consumes an `AccessContext` and produces an
//! `AccessVerdict`. Access is deny-by-default: a collection is readable only
//! if it is on the agent's allow-list or is the implicit collection of the
//! active backend.

use serde::{Deserialize, Serialize};

/// The decision for one tool-call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessVerdict {
    Allow,
    Deny {
        /// Human-readable explanation, written to the audit log.
        reason: String,
    },
}

impl AccessVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } => Some(reason),
        }
    }
}

/// Everything the access policy needs to decide.
///
/// Built by the tool executor from the agent config, the active backend, and
/// the parsed tool call. Plain strings keep policies independent of the rest
/// of the type hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessContext {
    pub agent_id: String,
    pub user_id: String,
    pub turn_id: String,
    /// Wire name of the tool being invoked.
    pub tool: String,
    /// The collection the call would read, after defaulting. `None` when
    /// the call reads no stored data (analysis over inline rows).
    pub collection: Option<String>,
    /// The agent's collection allow-list.
    pub allowed_collections: Vec<String>,
    /// The agent's tool allow-list, when it has one.
    pub allowed_tools: Option<Vec<String>>,
    /// The single collection an upload session or demo dataset represents.
    pub implicit_collection: Option<String>,
}
