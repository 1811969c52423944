//! Anonymized pattern records for organizational intelligence.
//!
//! A pattern record never carries message content: only categories, metrics,
//! a salted hash of the user id and a week-granular period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TimeAllocation,
    SkillUsage,
    ContentType,
    ToolUsage,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeAllocation => "time_allocation",
            Self::SkillUsage => "skill_usage",
            Self::ContentType => "content_type",
            Self::ToolUsage => "tool_usage",
        }
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time_allocation" => Ok(Self::TimeAllocation),
            "skill_usage" => Ok(Self::SkillUsage),
            "content_type" => Ok(Self::ContentType),
            "tool_usage" => Ok(Self::ToolUsage),
            other => Err(format!("unknown pattern type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Count,
    Duration,
    Frequency,
    Percentage,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Duration => "duration",
            Self::Frequency => "frequency",
            Self::Percentage => "percentage",
        }
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "duration" => Ok(Self::Duration),
            "frequency" => Ok(Self::Frequency),
            "percentage" => Ok(Self::Percentage),
            other => Err(format!("unknown metric type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub pattern_id: String,

    /// Salted SHA-256 prefix; never the plaintext user id
    pub user_id_hash: String,

    pub org_id: String,

    pub team_id: String,

    pub pattern_type: PatternType,

    pub category_l1: String,

    #[serde(default)]
    pub category_l2: String,

    #[serde(default)]
    pub category_l3: String,

    pub metric_type: MetricType,

    pub metric_value: f64,

    /// Generalized tool categories, never concrete tool names
    #[serde(default)]
    pub tools_involved: Vec<String>,

    pub timestamp: DateTime<Utc>,

    /// ISO week (`2026-W07`)
    pub period: String,
}
