//! Allow-list access policy.
//!
//! `AllowListPolicy` implements the `AccessPolicy` trait from quarry-core.
//!
//! Evaluation algorithm:
//!
//! 1. If the agent has a non-empty tool allow-list and the tool is not on it
//!    → `Deny`.
//! 2. If the call reads no collection (analysis over inline rows) → `Allow`.
//! 3. If the collection is on the agent's allow-list, or is the implicit
//!    collection of the active upload session or demo dataset → `Allow`.
//! 4. Anything else → `Deny` (deny-by-default).

use tracing::{debug, warn};

use quarry_contracts::{
    access::{AccessContext, AccessVerdict},
    error::QuarryResult,
};
use quarry_core::traits::AccessPolicy;

/// The one access-control primitive: exact membership in the allow-list.
///
/// Matching is exact and case-sensitive. There are no wildcards; an agent
/// that should read three collections lists all three.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowListPolicy;

impl AllowListPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl AccessPolicy for AllowListPolicy {
    fn authorize(&self, ctx: &AccessContext) -> QuarryResult<AccessVerdict> {
        debug!(
            agent_id = %ctx.agent_id,
            tool = %ctx.tool,
            collection = ctx.collection.as_deref().unwrap_or("-"),
            "evaluating access"
        );

        if let Some(tools) = &ctx.allowed_tools {
            if !tools.is_empty() && !tools.iter().any(|t| t == &ctx.tool) {
                warn!(agent_id = %ctx.agent_id, tool = %ctx.tool, "tool not on agent tool allow-list");
                return Ok(AccessVerdict::Deny {
                    reason: format!(
                        "tool '{}' is not enabled for agent '{}'",
                        ctx.tool, ctx.agent_id
                    ),
                });
            }
        }

        let Some(collection) = &ctx.collection else {
            return Ok(AccessVerdict::Allow);
        };

        if ctx.allowed_collections.iter().any(|c| c == collection) {
            return Ok(AccessVerdict::Allow);
        }

        if ctx.implicit_collection.as_ref() == Some(collection) {
            debug!(collection = %collection, "implicit session collection");
            return Ok(AccessVerdict::Allow);
        }

        warn!(
            agent_id = %ctx.agent_id,
            collection = %collection,
            "collection not on allow-list; denying"
        );
        Ok(AccessVerdict::Deny {
            reason: format!(
                "collection '{}' is not on the allow-list of agent '{}'",
                collection, ctx.agent_id
            ),
        })
    }
}
