//! Consent records: per-instance grants for each processing activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConsentError;

/// A processing activity that requires explicit consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    /// Core assistant functionality (messages, responses)
    DataProcessing,
    /// Storing personal memories for future context
    MemoryStorage,
    /// Anonymized pattern extraction for org intelligence
    PatternCollection,
    /// Anonymized cross-org benchmark contributions
    CrossOrgBenchmarking,
    /// Processing forwarded email content
    EmailProcessing,
}

impl ConsentType {
    pub const ALL: [ConsentType; 5] = [
        Self::DataProcessing,
        Self::MemoryStorage,
        Self::PatternCollection,
        Self::CrossOrgBenchmarking,
        Self::EmailProcessing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataProcessing => "data_processing",
            Self::MemoryStorage => "memory_storage",
            Self::PatternCollection => "pattern_collection",
            Self::CrossOrgBenchmarking => "cross_org_benchmarking",
            Self::EmailProcessing => "email_processing",
        }
    }
}

impl std::fmt::Display for ConsentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentType {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConsentError::InvalidType(s.to_string()))
    }
}

/// Current consent state for one (instance, type) pair.
///
/// Withdrawal keeps the record and flips `granted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub instance_id: String,
    pub consent_type: ConsentType,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn_at: Option<DateTime<Utc>>,
    /// Version of the consent text the user agreed to
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_types_roundtrip_through_str() {
        for t in ConsentType::ALL {
            assert_eq!(t.as_str().parse::<ConsentType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_consent_type_is_rejected() {
        let err = "telemetry".parse::<ConsentType>().unwrap_err();
        assert!(matches!(err, ConsentError::InvalidType(t) if t == "telemetry"));
    }
}
