//! Per-agent usage counters.
//!
//! Counters only ever increase and are updated with atomic adds, so
//! concurrent turns for the same agent never lose an update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use quarry_contracts::{
    agent::AgentId,
    execution::{Engagement, TurnResponse},
};

use crate::screen::{estimate_cost_savings, CostSavings, FULL_MODEL_COST, LIGHT_MODEL_COST};

#[derive(Debug, Default)]
struct AgentCounters {
    turns: AtomicU64,
    short_circuited: AtomicU64,
    model_calls: AtomicU64,
    tool_calls: AtomicU64,
    denied_tool_calls: AtomicU64,
}

/// A point-in-time copy of one agent's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub turns: u64,
    pub short_circuited: u64,
    pub model_calls: u64,
    pub tool_calls: u64,
    pub denied_tool_calls: u64,
}

#[derive(Debug, Default)]
pub struct AgentAnalytics {
    agents: RwLock<HashMap<AgentId, Arc<AgentCounters>>>,
}

impl AgentAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, agent: &AgentId) -> Arc<AgentCounters> {
        if let Some(counters) = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent)
        {
            return Arc::clone(counters);
        }
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(agents.entry(agent.clone()).or_default())
    }

    /// Count one finished turn.
    pub fn record_turn(&self, agent: &AgentId, response: &TurnResponse, denied_tool_calls: u64) {
        let counters = self.counters(agent);
        counters.turns.fetch_add(1, Ordering::Relaxed);
        if response.engagement == Engagement::ShortCircuit {
            counters.short_circuited.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .model_calls
            .fetch_add(u64::from(response.model_calls), Ordering::Relaxed);
        counters
            .tool_calls
            .fetch_add(u64::from(response.tool_calls), Ordering::Relaxed);
        counters
            .denied_tool_calls
            .fetch_add(denied_tool_calls, Ordering::Relaxed);
    }

    pub fn stats(&self, agent: &AgentId) -> AgentStats {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let Some(c) = agents.get(agent) else {
            return AgentStats::default();
        };
        AgentStats {
            turns: c.turns.load(Ordering::Relaxed),
            short_circuited: c.short_circuited.load(Ordering::Relaxed),
            model_calls: c.model_calls.load(Ordering::Relaxed),
            tool_calls: c.tool_calls.load(Ordering::Relaxed),
            denied_tool_calls: c.denied_tool_calls.load(Ordering::Relaxed),
        }
    }

    /// What screening has saved this agent at default per-message prices.
    pub fn cost_savings(&self, agent: &AgentId) -> CostSavings {
        let stats = self.stats(agent);
        estimate_cost_savings(stats.turns, stats.short_circuited, FULL_MODEL_COST, LIGHT_MODEL_COST)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_contracts::{
        agent::AgentId,
        execution::{Engagement, TurnResponse},
    };

    use super::AgentAnalytics;

    fn response(engagement: Engagement, model_calls: u32, tool_calls: u32) -> TurnResponse {
        TurnResponse {
            turn_id: "t".into(),
            response: "ok".into(),
            sources: None,
            insights: vec![],
            follow_up_questions: vec![],
            engagement,
            engagement_reason: String::new(),
            model_calls,
            tool_calls,
        }
    }

    #[test]
    fn test_counters_accumulate_per_agent() {
        let analytics = AgentAnalytics::new();
        let a = AgentId("a".into());
        analytics.record_turn(&a, &response(Engagement::ShortCircuit, 0, 0), 0);
        analytics.record_turn(&a, &response(Engagement::FullModel, 2, 3), 1);

        let stats = analytics.stats(&a);
        assert_eq!(stats.turns, 2);
        assert_eq!(stats.short_circuited, 1);
        assert_eq!(stats.model_calls, 2);
        assert_eq!(stats.tool_calls, 3);
        assert_eq!(stats.denied_tool_calls, 1);
        assert_eq!(analytics.stats(&AgentId("b".into())).turns, 0);
        assert!(analytics.cost_savings(&a).savings > 0.0);
    }

    #[test]
    fn test_concurrent_turns_lose_no_updates() {
        let analytics = Arc::new(AgentAnalytics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let analytics = Arc::clone(&analytics);
                std::thread::spawn(move || {
                    let a = AgentId("shared".into());
                    for _ in 0..100 {
                        analytics.record_turn(&a, &response(Engagement::FullModel, 1, 0), 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(analytics.stats(&AgentId("shared".into())).turns, 800);
    }
}
