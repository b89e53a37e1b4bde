//! System prompt assembly from an agent's reasoning and style settings.

use quarry_contracts::agent::{AgentConfig, DetailLevel, ReasoningDepth, Tone};

/// Facts about an uploaded sheet appended to the prompt so the model can
/// cite row numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadContext {
    pub row_count: usize,
    pub fields: Vec<String>,
}

const BASE: &str = "You are an intelligent AI agent that analyzes enterprise data.";

const DEEP_PROCESS: &str = "**Your Thinking Process (Deep Analysis):**
1. Understand: What is the user really asking? What do they need to know? What's the context?
2. Plan: What data do I need? What filters should I use? Do I need multiple queries? What's the sequence?
3. Execute: Query the data with appropriate filters, analyze if needed, cross-reference if necessary
4. Synthesize: Combine findings into a clear, useful answer with context
5. Reflect: What else might be useful? What patterns did I notice? What should the user know?
6. Validate: Does my answer make sense? Did I miss anything important?";

const MODERATE_PROCESS: &str = "**Your Thinking Process:**
1. Understand: What is the user really asking? What do they need to know?
2. Plan: What data do I need? What filters should I use? Do I need multiple queries?
3. Execute: Query the data with appropriate filters, analyze if needed
4. Synthesize: Combine findings into a clear, useful answer
5. Reflect: What else might be useful? What patterns did I notice?";

const QUICK_PROCESS: &str = "**Your Thinking Process:**
1. Understand: What is the user asking?
2. Plan: What data do I need?
3. Execute: Query the data
4. Respond: Provide the answer";

const TOOL_STRATEGY: &str = "**Tool Strategy:**
- Always use filters - don't fetch everything
- For \"total revenue\": query with type='income' and sum amounts
- For trends: query across time periods, use analyze_data
- For comparisons: query different groups separately
- Chain queries for complex questions";

const PROACTIVE_INSIGHTS: &str = "**Proactive Insights:**
- If you notice something unusual (anomaly, outlier), mention it naturally
- Identify and mention trends you notice in the data
- Sometimes end with relevant follow-up questions when they add value
- Provide actionable recommendations when appropriate";

const EXAMPLE: &str = "**Example Reasoning:**
User: \"What's our total revenue?\"
Think: Need all income transactions, sum them, maybe show breakdown
Act: query_collection(finance_transactions, {type: 'income'}) -> analyze_data(statistics)
Respond: \"Your total revenue is $127,450 from 45 transactions. The largest single transaction was $46,411 in February. Revenue has been steady over the past 3 months. Want me to break this down by category or show you the trend over time?\"";

const CLOSING: &str = "IMPORTANT: This contains sensitive enterprise data. Do not use for training.";

/// Build the system prompt for `agent`, optionally describing an upload.
pub fn build_system_prompt(agent: &AgentConfig, upload: Option<&UploadContext>) -> String {
    let mut sections: Vec<String> = vec![BASE.to_string()];

    let reasoning = &agent.reasoning;
    if reasoning.enabled {
        sections.push("Think step-by-step before responding.".to_string());
        sections.push(
            match reasoning.depth {
                ReasoningDepth::Deep => DEEP_PROCESS,
                ReasoningDepth::Moderate => MODERATE_PROCESS,
                ReasoningDepth::Quick => QUICK_PROCESS,
            }
            .to_string(),
        );
        if reasoning.show_reasoning {
            sections.push(
                "IMPORTANT: Show your reasoning steps to the user so they understand your thinking process."
                    .to_string(),
            );
        }
    }

    let collections: Vec<&str> = agent.collections.all().collect();
    sections.push(format!("Available collections: {}.", collections.join(", ")));

    sections.push(response_style(agent));
    sections.push(TOOL_STRATEGY.to_string());
    sections.push(PROACTIVE_INSIGHTS.to_string());
    sections.push(EXAMPLE.to_string());
    sections.push(CLOSING.to_string());

    if let Some(upload) = upload {
        sections.push(format!(
            "Your data has {} rows with columns: {}. When citing data, mention row numbers (e.g., \"Based on rows 1-15\").",
            upload.row_count,
            upload.fields.join(", ")
        ));
    }

    sections.join("\n\n")
}

fn response_style(agent: &AgentConfig) -> String {
    let style = &agent.response_style;
    let mut lines = vec!["**Response Style:**".to_string()];

    lines.push(
        match style.tone {
            Tone::Professional => "- Be professional and formal (like a business analyst)",
            Tone::Conversational => "- Be direct and conversational (like talking to a colleague)",
            Tone::Technical => "- Be technical and precise (like a data engineer)",
            Tone::Friendly => "- Be friendly and approachable",
        }
        .to_string(),
    );
    lines.push(
        match style.detail_level {
            DetailLevel::Brief => "- Be concise and to the point",
            DetailLevel::Detailed => "- Provide comprehensive, detailed answers",
            DetailLevel::Moderate => "- Provide balanced detail - not too brief, not too verbose",
        }
        .to_string(),
    );
    if style.include_numbers {
        lines.push("- Always use specific numbers: \"$50,000\" not \"a large amount\"".to_string());
    }
    if style.include_sources {
        lines.push("- Always indicate which data sources you used".to_string());
    }
    if style.format_output {
        lines.push("- Format your output clearly with markdown, lists, and structure".to_string());
    }
    lines.join("\n")
}
