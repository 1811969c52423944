//! Anonymized pattern records.
//!
//! Only categories and metrics leave a conversation: the user id is a salted
//! hash, tool names are generalized and time is blurred to an ISO week.

use chrono::{DateTime, Datelike, Utc};
use orgclaw_core::pattern::{MetricType, PatternRecord, PatternType};
use sha2::{Digest, Sha256};

/// First 16 hex characters of `SHA-256("{user_id}:{salt}")`.
pub fn hash_user_id(user_id: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{user_id}:{salt}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// Map a concrete tool name to its category; unknown tools are `other`.
pub fn generalize_tool(tool_name: &str) -> &'static str {
    match tool_name.trim().to_lowercase().as_str() {
        "excel" | "google sheets" | "sheets" => "spreadsheet_tools",
        "salesforce" | "hubspot" | "pipedrive" => "crm",
        "slack" | "teams" | "email" | "gmail" | "outlook" => "communication",
        "jira" | "asana" | "linear" | "trello" => "project_management",
        "google docs" | "word" | "notion" | "confluence" => "document_tools",
        "google calendar" | "outlook calendar" => "calendar",
        "figma" | "canva" => "design_tools",
        "google analytics" | "tableau" | "power bi" => "analytics",
        _ => "other",
    }
}

/// ISO week of `at`, formatted `YYYY-Www`.
pub fn period_for(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn current_period() -> String {
    period_for(Utc::now())
}

/// Inputs for [`build_pattern_record`].
#[derive(Debug, Clone)]
pub struct PatternParams<'a> {
    pub user_id: &'a str,
    pub org_id: &'a str,
    pub team_id: &'a str,
    pub user_id_salt: &'a str,
    pub pattern_type: PatternType,
    pub category_l1: &'a str,
    pub category_l2: &'a str,
    pub category_l3: &'a str,
    pub metric_type: MetricType,
    pub metric_value: f64,
    pub tools_involved: &'a [&'a str],
}

pub fn build_pattern_record(params: PatternParams<'_>) -> PatternRecord {
    let now = Utc::now();
    PatternRecord {
        pattern_id: uuid::Uuid::new_v4().to_string(),
        user_id_hash: hash_user_id(params.user_id, params.user_id_salt),
        org_id: params.org_id.to_string(),
        team_id: params.team_id.to_string(),
        pattern_type: params.pattern_type,
        category_l1: params.category_l1.to_string(),
        category_l2: params.category_l2.to_string(),
        category_l3: params.category_l3.to_string(),
        metric_type: params.metric_type,
        metric_value: params.metric_value,
        tools_involved: params
            .tools_involved
            .iter()
            .map(|t| generalize_tool(t).to_string())
            .collect(),
        timestamp: now,
        period: period_for(now),
    }
}
