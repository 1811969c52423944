//! Tenant domain types: user instances and channel bindings.
//!
//! A `UserInstance` is the tenant-scoped assistant identity for one user in one
//! organization. A `ChannelBinding` maps an external chat identity onto exactly
//! one instance. Both are provisioned by administrative flows; the conversation
//! core only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How much of the user's working environment the assistant may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Only content the user explicitly forwards
    #[default]
    Forward,
    /// Full access to connected tools
    Full,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Full => "full",
        }
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown access mode '{other}'")),
        }
    }
}

/// Lifecycle status of a user instance.
///
/// `provisioning` → `active` → `suspended` | `deleting` → `deleted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Provisioning,
    Active,
    Suspended,
    Deleting,
    Deleted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

/// A tenant-scoped assistant identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInstance {
    /// Unique instance ID
    pub instance_id: String,

    /// The underlying user this instance serves
    pub user_id: String,

    /// Owning organization
    pub org_id: String,

    /// Team within the organization
    pub team_id: String,

    /// Coarse role category (e.g. "sales", "engineer")
    pub role_category: String,

    pub access_mode: AccessMode,

    pub status: InstanceStatus,

    /// Private working-folder reference
    pub folder: String,

    pub created_at: DateTime<Utc>,
}

impl UserInstance {
    /// Build a new instance in the `provisioning` state.
    pub fn new(
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        team_id: impl Into<String>,
        role_category: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            folder: format!("users/{user_id}"),
            user_id,
            org_id: org_id.into(),
            team_id: team_id.into(),
            role_category: role_category.into(),
            access_mode: AccessMode::default(),
            status: InstanceStatus::Provisioning,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }
}

/// Maps an external chat identity to a user instance.
///
/// The `(channel_type, channel_org_ref, channel_user_ref)` triple is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Channel type (e.g. "slack", "teams", "email", "cli")
    pub channel_type: String,

    /// Workspace / tenant / domain reference on the channel side
    pub channel_org_ref: String,

    /// User reference on the channel side
    pub channel_user_ref: String,

    pub org_id: String,

    pub instance_id: String,

    pub created_at: DateTime<Utc>,
}

impl ChannelBinding {
    /// Bind a channel identity to an instance.
    pub fn for_instance(
        instance: &UserInstance,
        channel_type: impl Into<String>,
        channel_org_ref: impl Into<String>,
        channel_user_ref: impl Into<String>,
    ) -> Self {
        Self {
            channel_type: channel_type.into(),
            channel_org_ref: channel_org_ref.into(),
            channel_user_ref: channel_user_ref.into(),
            org_id: instance.org_id.clone(),
            instance_id: instance.instance_id.clone(),
            created_at: Utc::now(),
        }
    }
}
