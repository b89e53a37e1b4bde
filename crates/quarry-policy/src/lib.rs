//! # quarry-policy
//!
//! Deny-by-default access control for the quarry runtime.
//!
//! ## Overview
//!
//! This crate provides [`AllowListPolicy`], which implements the
//! [`AccessPolicy`](quarry_core::traits::AccessPolicy) trait, the TOML
//! [`AgentRegistry`] the runtime loads agents from, and the
//! [`SlidingWindowLimiter`] consulted before a turn starts.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use quarry_policy::{AgentRegistry, AllowListPolicy};
//!
//! let registry = AgentRegistry::from_file(Path::new("agents.toml"))?;
//! let policy = AllowListPolicy::new();
//! // Pass `policy` to `quarry_core::ToolExecutor::new(...)`.
//! ```

pub mod allow_list;
pub mod rate_limit;
pub mod registry;

pub use allow_list::AllowListPolicy;
pub use rate_limit::{rate_limit_key, RateLimitConfig, RateLimitStatus, SlidingWindowLimiter};
pub use registry::AgentRegistry;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use quarry_contracts::{
        access::{AccessContext, AccessVerdict},
        agent::ProviderKind,
        error::QuarryError,
    };
    use quarry_core::traits::AccessPolicy;

    use crate::{rate_limit_key, AgentRegistry, AllowListPolicy, RateLimitConfig, SlidingWindowLimiter};

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Build an `AccessContext` for an agent allowed to read `finance_transactions`.
    fn ctx(collection: Option<&str>) -> AccessContext {
        AccessContext {
            agent_id: "finance-analyst".to_string(),
            user_id: "user-1".to_string(),
            turn_id: "turn-1".to_string(),
            tool: "query_collection".to_string(),
            collection: collection.map(str::to_string),
            allowed_collections: vec!["finance_transactions".to_string()],
            allowed_tools: None,
            implicit_collection: None,
        }
    }

    // ── 1. allow-list ─────────────────────────────────────────────────────────

    #[test]
    fn test_listed_collection_is_allowed() {
        let verdict = AllowListPolicy::new()
            .authorize(&ctx(Some("finance_transactions")))
            .unwrap();
        assert_eq!(verdict, AccessVerdict::Allow);
    }

    /// Any collection not on the list is denied, including near-misses.
    #[test]
    fn test_unlisted_collection_is_denied() {
        let policy = AllowListPolicy::new();
        for name in ["payroll_secrets", "Finance_Transactions", "finance_transactions ", ""] {
            let verdict = policy.authorize(&ctx(Some(name))).unwrap();
            assert!(!verdict.is_allowed(), "'{}' must be denied", name);
        }
    }

    #[test]
    fn test_deny_reason_names_collection() {
        let verdict = AllowListPolicy::new()
            .authorize(&ctx(Some("payroll_secrets")))
            .unwrap();
        assert!(verdict.reason().unwrap().contains("payroll_secrets"));
    }

    /// An empty allow-list denies everything that reads a collection.
    #[test]
    fn test_empty_allow_list_denies_by_default() {
        let mut c = ctx(Some("finance_transactions"));
        c.allowed_collections.clear();
        assert!(!AllowListPolicy::new().authorize(&c).unwrap().is_allowed());
    }

    // ── 2. implicit session collection ────────────────────────────────────────

    #[test]
    fn test_implicit_collection_is_allowed() {
        let mut c = ctx(Some("uploaded_data"));
        c.allowed_collections.clear();
        c.implicit_collection = Some("uploaded_data".to_string());
        assert!(AllowListPolicy::new().authorize(&c).unwrap().is_allowed());
    }

    #[test]
    fn test_implicit_collection_does_not_widen_to_others() {
        let mut c = ctx(Some("payroll_secrets"));
        c.implicit_collection = Some("uploaded_data".to_string());
        assert!(!AllowListPolicy::new().authorize(&c).unwrap().is_allowed());
    }

    #[test]
    fn test_call_without_collection_is_allowed() {
        assert!(AllowListPolicy::new().authorize(&ctx(None)).unwrap().is_allowed());
    }

    // ── 3. tool allow-list ────────────────────────────────────────────────────

    #[test]
    fn test_tool_outside_tool_allow_list_is_denied() {
        let mut c = ctx(Some("finance_transactions"));
        c.allowed_tools = Some(vec!["analyze_data".to_string()]);
        let verdict = AllowListPolicy::new().authorize(&c).unwrap();
        assert!(verdict.reason().unwrap().contains("query_collection"));
    }

    #[test]
    fn test_empty_tool_allow_list_permits_all_tools() {
        let mut c = ctx(Some("finance_transactions"));
        c.allowed_tools = Some(vec![]);
        assert!(AllowListPolicy::new().authorize(&c).unwrap().is_allowed());
    }

    // ── 4. registry ───────────────────────────────────────────────────────────

    #[test]
    fn test_registry_parses_agents() {
        let toml = r#"
            [[agents]]
            id = "finance-analyst"
            owner = "user-1"
            collections = ["finance_transactions", "sales_deals"]
            allowed_tools = ["query_collection", "analyze_data"]

            [agents.model]
            provider = "anthropic"
            model = "claude-3-5-sonnet-latest"

            [agents.cost]
            pre_screening = false

            [[agents]]
            id = "hr-helper"
            owner = "user-2"
            collections = ["hr_employees"]
        "#;

        let registry = AgentRegistry::from_toml_str(toml).unwrap();
        assert_eq!(registry.len(), 2);

        let finance = registry.get("finance-analyst").unwrap();
        assert!(finance.collections.has("sales_deals"));
        assert_eq!(finance.model.provider, ProviderKind::Anthropic);
        assert!(!finance.cost.pre_screening);
        assert!(!finance.tool_permitted("get_collection_schema"));

        let hr = registry.get("hr-helper").unwrap();
        assert_eq!(hr.model.model, "gpt-4o");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let toml = r#"
            [[agents]]
            id = "a"
            owner = "u"
            collections = []

            [[agents]]
            id = "a"
            owner = "u"
            collections = []
        "#;
        let err = AgentRegistry::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate agent id"));
    }

    #[test]
    fn test_registry_rejects_malformed_toml() {
        let err = AgentRegistry::from_toml_str("[[agents]\nid = ").unwrap_err();
        assert!(matches!(err, QuarryError::ConfigError { .. }));
    }

    // ── 5. rate limiting ──────────────────────────────────────────────────────

    #[test]
    fn test_rate_limit_key_prefers_user() {
        assert_eq!(rate_limit_key(Some("u1"), Some("1.2.3.4")), "user:u1");
        assert_eq!(rate_limit_key(None, Some("1.2.3.4, 10.0.0.1")), "ip:1.2.3.4");
        assert_eq!(rate_limit_key(None, None), "ip:unknown");
    }

    #[test]
    fn test_limiter_refuses_after_limit_with_retry_hint() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests: 3,
            window_secs: 60,
        });
        let start = Instant::now();

        for i in 0..3 {
            let status = limiter.check_at("user:u1", start + Duration::from_secs(i)).unwrap();
            assert_eq!(status.remaining, 2 - i as usize);
        }

        match limiter.check_at("user:u1", start + Duration::from_secs(10)) {
            Err(QuarryError::RateLimited { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        // Other keys have their own window.
        assert!(limiter.check_at("user:u2", start + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_limiter_window_slides() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests: 2,
            window_secs: 60,
        });
        let start = Instant::now();

        limiter.check_at("ip:1.2.3.4", start).unwrap();
        limiter.check_at("ip:1.2.3.4", start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at("ip:1.2.3.4", start + Duration::from_secs(59)).is_err());

        // The first hit has left the window.
        assert!(limiter.check_at("ip:1.2.3.4", start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_idle_keys_are_evicted_after_the_window() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests: 5,
            window_secs: 60,
        });
        let start = Instant::now();

        for i in 0..10_000 {
            limiter.check_at(&format!("ip:10.0.{}.{}", i / 256, i % 256), start).unwrap();
        }
        assert_eq!(limiter.tracked_keys(), 10_000);

        // Inside the window nothing is dropped.
        limiter.check_at("user:u1", start + Duration::from_secs(30)).unwrap();
        assert_eq!(limiter.tracked_keys(), 10_001);

        // An hour later only the key being checked remains.
        limiter.check_at("user:u2", start + Duration::from_secs(3600)).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
