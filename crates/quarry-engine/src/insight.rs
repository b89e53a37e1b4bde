//! Proactive insights and follow-up suggestions.
//!
//! Both are pure functions over data the turn already fetched. The rules are
//! heuristics: small samples produce false positives and that is accepted.

use serde_json::{json, Value};

use quarry_contracts::{
    collection::CollectionSet,
    insight::{Insight, InsightKind},
    tool::{parse_timestamp, Row},
};

use crate::currency::{format_currency, Currency};

pub const MAX_INSIGHTS: usize = 3;
pub const MAX_FOLLOW_UPS: usize = 3;

/// A value above this multiple of the mean is reported as an outlier.
const ANOMALY_FACTOR: f64 = 1.5;
/// Relative change, in percent, between the oldest and newest three rows
/// that counts as a trend.
const TREND_THRESHOLD_PCT: f64 = 20.0;
const TREND_WINDOW: usize = 3;
const HIGH_VALUE_DEAL: f64 = 10_000.0;

/// The measured field of the collections insights know about.
fn amount_field(collection: &str) -> Option<&'static str> {
    match collection {
        "finance_transactions" => Some("amount"),
        "sales_deals" => Some("value"),
        _ => None,
    }
}

fn date_field(collection: &str) -> &'static str {
    match collection {
        "finance_transactions" => "date",
        "sales_deals" => "expectedCloseDate",
        "hr_employees" => "hireDate",
        _ => "createdAt",
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Up to three insights about `rows` read from `collection`.
pub fn generate_insights(rows: &[Row], collection: &str) -> Vec<Insight> {
    let mut insights = Vec::new();
    if rows.is_empty() {
        return insights;
    }

    if let Some(field) = amount_field(collection) {
        insights.extend(anomaly(rows, field));
        insights.extend(trend(rows, field, date_field(collection)));
    }
    insights.extend(opportunities(rows, collection));

    insights.truncate(MAX_INSIGHTS);
    insights
}

fn anomaly(rows: &[Row], field: &str) -> Option<Insight> {
    let amounts: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(field).and_then(Value::as_f64))
        .collect();
    if amounts.is_empty() {
        return None;
    }

    let avg = amounts.iter().sum::<f64>() / amounts.len() as f64;
    let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= avg * ANOMALY_FACTOR {
        return None;
    }

    let outlier = rows
        .iter()
        .find(|row| row.get(field).and_then(Value::as_f64) == Some(max));
    let subject = outlier
        .and_then(|row| row.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("this transaction");

    Some(Insight {
        kind: InsightKind::Anomaly,
        title: "Unusual Transaction Detected".to_string(),
        description: format!(
            "Found a {} of {} which is significantly above the average of {}.",
            field,
            format_currency(max, Currency::Usd),
            format_currency(avg, Currency::Usd)
        ),
        suggested_question: Some(format!("Tell me more about {}", subject)),
        data: outlier.cloned().map(Value::Object),
    })
}

fn trend(rows: &[Row], amount: &str, date: &str) -> Option<Insight> {
    let mut dated: Vec<(chrono::NaiveDateTime, f64)> = rows
        .iter()
        .filter_map(|row| {
            let when = row.get(date).and_then(Value::as_str).and_then(parse_timestamp)?;
            let value = row.get(amount).and_then(Value::as_f64).unwrap_or(0.0);
            Some((when, value))
        })
        .collect();
    if dated.len() < TREND_WINDOW {
        return None;
    }
    dated.sort_by_key(|(when, _)| *when);

    let mean = |window: &[(chrono::NaiveDateTime, f64)]| {
        window.iter().map(|(_, v)| v).sum::<f64>() / window.len() as f64
    };
    let older_avg = mean(&dated[..TREND_WINDOW]);
    let recent_avg = mean(&dated[dated.len() - TREND_WINDOW..]);
    if older_avg == 0.0 {
        return None;
    }

    let change = (recent_avg - older_avg) / older_avg * 100.0;
    if change.abs() <= TREND_THRESHOLD_PCT {
        return None;
    }

    let (title, verb, noun) = if change > 0.0 {
        ("Increasing Trend", "increased", "increase")
    } else {
        ("Decreasing Trend", "decreased", "decrease")
    };
    Some(Insight {
        kind: InsightKind::Trend,
        title: title.to_string(),
        description: format!(
            "{} has {} by {:.1}% in recent periods.",
            amount,
            verb,
            change.abs()
        ),
        suggested_question: Some(format!("What's causing this {}?", noun)),
        data: Some(json!({
            "change": change,
            "recentAvg": recent_avg,
            "olderAvg": older_avg,
        })),
    })
}

fn opportunities(rows: &[Row], collection: &str) -> Vec<Insight> {
    let text = |row: &Row, key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    let mut found = Vec::new();

    match collection {
        "finance_transactions" => {
            let pending = rows
                .iter()
                .filter(|row| text(row, "status").as_deref() == Some("pending"))
                .count();
            if pending > 0 {
                found.push(opportunity(
                    "Pending Transactions",
                    format!(
                        "There are {} pending transaction{} that may need attention.",
                        pending,
                        plural(pending)
                    ),
                    "Show me all pending transactions and their details",
                    pending,
                ));
            }
        }
        "sales_deals" => {
            let high_value = rows
                .iter()
                .filter(|row| row.get("value").and_then(Value::as_f64).is_some_and(|v| v > HIGH_VALUE_DEAL))
                .count();
            let in_progress = rows
                .iter()
                .filter(|row| matches!(text(row, "stage").as_deref(), Some("proposal" | "negotiation")))
                .count();

            if high_value > 0 {
                found.push(opportunity(
                    "High-Value Deals",
                    format!("Found {} deal{} worth over $10,000.", high_value, plural(high_value)),
                    "What are the details of these high-value deals?",
                    high_value,
                ));
            }
            if in_progress > 0 {
                found.push(opportunity(
                    "Deals in Progress",
                    format!(
                        "There are {} deal{} in proposal or negotiation stage.",
                        in_progress,
                        plural(in_progress)
                    ),
                    "Show me the deals that need follow-up",
                    in_progress,
                ));
            }
        }
        _ => {}
    }
    found
}

fn opportunity(title: &str, description: String, question: &str, count: usize) -> Insight {
    Insight {
        kind: InsightKind::Opportunity,
        title: title.to_string(),
        description,
        suggested_question: Some(question.to_string()),
        data: Some(json!({ "count": count })),
    }
}

// ── Follow-ups ───────────────────────────────────────────────────────────────

/// Up to three questions the user might ask next.
///
/// Keyword-triggered templates per domain; a generic list when no domain
/// keyword appears in `question`.
pub fn generate_follow_up_questions(question: &str, collections: &CollectionSet) -> Vec<String> {
    let lower = question.to_lowercase();
    let mut questions: Vec<String> = Vec::new();

    if lower.contains("transaction") || lower.contains("finance") {
        questions.push("What are the largest transactions this month?".into());
        questions.push("Show me transactions by category".into());
        if !lower.contains("trend") {
            questions.push("What are the spending trends over the last 3 months?".into());
        }
    }

    if lower.contains("deal") || lower.contains("sales") {
        questions.push("What deals are closing this month?".into());
        questions.push("Which deals are at risk?".into());
        if !lower.contains("pipeline") {
            questions.push("Show me the sales pipeline overview".into());
        }
    }

    if lower.contains("employee") || lower.contains("hr") {
        questions.push("How many employees are in each department?".into());
        questions.push("Show me recent hires".into());
    }

    if questions.is_empty() {
        questions.push("Can you break this down by category?".into());
        questions.push("What are the trends over time?".into());
        if let Some(second) = collections.all().nth(1) {
            questions.push(format!("What about {}?", second));
        }
    }

    questions.truncate(MAX_FOLLOW_UPS);
    questions
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use quarry_contracts::{collection::CollectionSet, insight::InsightKind, tool::Row};

    use super::{generate_follow_up_questions, generate_insights};

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_outlier_amount_is_flagged() {
        let data = rows(vec![
            json!({ "id": "t1", "amount": 100, "date": "2024-01-01" }),
            json!({ "id": "t2", "amount": 120, "date": "2024-01-02" }),
            json!({ "id": "t3", "amount": 110, "date": "2024-01-03" }),
            json!({ "id": "t4", "amount": 900, "date": "2024-01-04" }),
        ]);
        let insights = generate_insights(&data, "finance_transactions");

        let anomaly = insights.iter().find(|i| i.kind == InsightKind::Anomaly).unwrap();
        assert_eq!(anomaly.title, "Unusual Transaction Detected");
        assert!(anomaly.description.contains("$900"));
        assert_eq!(anomaly.suggested_question.as_deref(), Some("Tell me more about t4"));
        assert_eq!(anomaly.data.as_ref().unwrap()["id"], "t4");
    }

    #[test]
    fn test_rising_values_produce_increasing_trend() {
        let data = rows(vec![
            json!({ "value": 100, "expectedCloseDate": "2024-01-01" }),
            json!({ "value": 100, "expectedCloseDate": "2024-02-01" }),
            json!({ "value": 100, "expectedCloseDate": "2024-03-01" }),
            json!({ "value": 200, "expectedCloseDate": "2024-06-01" }),
            json!({ "value": 200, "expectedCloseDate": "2024-05-01" }),
            json!({ "value": 200, "expectedCloseDate": "2024-04-01" }),
        ]);
        let insights = generate_insights(&data, "sales_deals");

        let trend = insights.iter().find(|i| i.kind == InsightKind::Trend).unwrap();
        assert_eq!(trend.title, "Increasing Trend");
        assert_eq!(trend.description, "value has increased by 100.0% in recent periods.");
    }

    #[test]
    fn test_pending_transactions_are_an_opportunity() {
        let data = rows(vec![
            json!({ "amount": 10, "status": "pending" }),
            json!({ "amount": 10, "status": "cleared" }),
        ]);
        let insights = generate_insights(&data, "finance_transactions");
        let pending = insights.iter().find(|i| i.title == "Pending Transactions").unwrap();
        assert_eq!(pending.description, "There are 1 pending transaction that may need attention.");
    }

    #[test]
    fn test_insights_are_capped_at_three() {
        let data = rows(vec![
            json!({ "value": 50_000, "stage": "proposal", "expectedCloseDate": "2024-01-01" }),
            json!({ "value": 100, "stage": "negotiation", "expectedCloseDate": "2024-02-01" }),
            json!({ "value": 100, "stage": "won", "expectedCloseDate": "2024-03-01" }),
            json!({ "value": 100, "stage": "won", "expectedCloseDate": "2024-04-01" }),
        ]);
        assert_eq!(generate_insights(&data, "sales_deals").len(), 3);
        assert!(generate_insights(&[], "sales_deals").is_empty());
    }

    #[test]
    fn test_unknown_collection_has_no_amount_insights() {
        let data = rows(vec![json!({ "amount": 1 }), json!({ "amount": 1000 })]);
        assert!(generate_insights(&data, "uploaded_data").is_empty());
    }

    #[test]
    fn test_follow_ups_by_domain_keyword() {
        let collections: CollectionSet = ["finance_transactions"].into_iter().collect();
        let finance = generate_follow_up_questions("Show finance trend", &collections);
        assert_eq!(
            finance,
            vec![
                "What are the largest transactions this month?".to_string(),
                "Show me transactions by category".to_string(),
            ]
        );

        let mixed = generate_follow_up_questions("transactions and deals", &collections);
        assert_eq!(mixed.len(), 3);
    }

    #[test]
    fn test_generic_follow_ups_mention_second_collection() {
        let collections: CollectionSet = ["finance_transactions", "sales_deals"].into_iter().collect();
        let questions = generate_follow_up_questions("What's our burn rate?", &collections);
        assert_eq!(questions[2], "What about sales_deals?");
    }
}
