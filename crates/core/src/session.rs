//! Session and SessionMessage domain types.
//!
//! A session is one continuous, possibly cross-channel conversation for a
//! user instance. Messages are never deleted by the core; compaction only
//! flips `is_compacted` so the turn is kept for audit and export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Session lifecycle state.
///
/// `Active` is initial. `Closed` and `Expired` are terminal. `Idle` is
/// reserved for manual tooling and is never produced by automated logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Closed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Closed => "closed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Expired)
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "closed" => Ok(Self::Closed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// The role of a message sender in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant
    Assistant,
    /// System notes
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One continuous conversation for a user instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,

    pub instance_id: String,

    /// Channel type the session started on
    pub channel_type: String,

    /// Channel-side conversation reference, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    pub started_at: DateTime<Utc>,

    pub last_activity_at: DateTime<Utc>,

    pub status: SessionStatus,

    /// Accumulated compaction / closing summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Number of non-compacted messages
    pub message_count: u64,

    /// Sum of token estimates over non-compacted messages
    pub token_count: u64,
}

impl Session {
    /// Create a new `active` session with zero counts.
    pub fn new(
        instance_id: impl Into<String>,
        channel_type: impl Into<String>,
        channel_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            channel_type: channel_type.into(),
            channel_id,
            started_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            summary: None,
            message_count: 0,
            token_count: 0,
        }
    }

    /// Refresh `last_activity_at`.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// A single turn within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub message_id: String,

    pub session_id: String,

    pub role: Role,

    pub content: String,

    /// Channel the turn arrived on / was sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub token_estimate: u64,

    #[serde(default)]
    pub is_compacted: bool,
}

impl SessionMessage {
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        channel_type: Option<String>,
        token_estimate: u64,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            channel_type,
            timestamp: Utc::now(),
            token_estimate,
            is_compacted: false,
        }
    }
}
