//! Personal memory: what the assistant has learned about one user.
//!
//! Memories are scoped to a user instance and typed so the prompt builder can
//! group them. Deletion is soft; expired memories are pruned separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The kind of thing a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    Pattern,
    Relationship,
    Decision,
    Context,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Pattern => "pattern",
            Self::Relationship => "relationship",
            Self::Decision => "decision",
            Self::Context => "context",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "pattern" => Ok(Self::Pattern),
            "relationship" => Ok(Self::Relationship),
            "decision" => Ok(Self::Decision),
            "context" => Ok(Self::Context),
            other => Err(format!("unknown memory type '{other}'")),
        }
    }
}

/// A single stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this memory
    pub memory_id: String,

    /// Owning user instance
    pub instance_id: String,

    pub memory_type: MemoryType,

    /// The content of the memory
    pub content: String,

    /// Channel the memory was learned on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel: Option<String>,

    /// Extraction confidence, 0.0 – 1.0
    pub confidence: f32,

    /// How often recall has surfaced this memory
    #[serde(default)]
    pub access_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_deleted: bool,
}

impl MemoryRecord {
    pub fn new(
        instance_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            memory_id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            memory_type,
            content: content.into(),
            source_channel: None,
            confidence: 1.0,
            access_count: 0,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            is_deleted: false,
        }
    }
}

/// A query against one instance's memories.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Restrict to one memory type
    pub memory_type: Option<MemoryType>,

    /// Match memories containing any of these keywords (case-insensitive).
    /// Empty = no keyword filter.
    pub keywords: Vec<String>,

    /// Maximum number of results, newest first
    pub limit: usize,
}
