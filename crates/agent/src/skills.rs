//! Skill registry: slash-command skills injected into the system prompt.
//!
//! The registry is built once (from a list or a TOML file) and is immutable
//! afterwards; callers share it behind an `Arc`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// One skill definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    /// Optional grouping label (e.g. "sales", "analysis")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// e.g. `/pipeline-risk`; skills without one are never matched by text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slash_command: Option<String>,
    pub instructions: String,
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_criteria: Option<String>,
}

#[derive(Debug, Error)]
pub enum SkillLoadError {
    #[error("Failed to read skills file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse skills file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid skill definition: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct SkillsFile {
    #[serde(default)]
    skills: Vec<Skill>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: Vec<Skill>,
}

impl SkillRegistry {
    /// Build a registry; ids must be non-empty and unique.
    pub fn new(skills: Vec<Skill>) -> Result<Self, SkillLoadError> {
        let mut seen = HashSet::new();
        for skill in &skills {
            if skill.id.trim().is_empty() {
                return Err(SkillLoadError::Invalid(format!(
                    "skill '{}' has an empty id",
                    skill.name
                )));
            }
            if !seen.insert(skill.id.as_str()) {
                return Err(SkillLoadError::Invalid(format!(
                    "duplicate skill id '{}'",
                    skill.id
                )));
            }
        }
        Ok(Self { skills })
    }

    /// Load `[[skills]]` entries from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SkillLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| SkillLoadError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: SkillsFile = toml::from_str(&content).map_err(|e| SkillLoadError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let registry = Self::new(file.skills)?;
        info!(path = %path.display(), count = registry.len(), "Loaded skills");
        Ok(registry)
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The first skill whose slash command prefixes the trimmed message,
    /// compared case-insensitively.
    pub fn match_message(&self, text: &str) -> Option<&Skill> {
        let text = text.trim().to_lowercase();
        self.skills.iter().find(|skill| {
            skill
                .slash_command
                .as_deref()
                .is_some_and(|cmd| text.starts_with(&cmd.to_lowercase()))
        })
    }

    pub fn find(&self, id: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.id == id)
    }
}

/// Render the active-skill section of the system prompt.
pub fn skill_prompt(skill: &Skill) -> String {
    let mut parts = vec![
        format!("## Active Skill: {}", skill.name),
        String::new(),
        "The user has invoked a skill. Follow these instructions precisely.".to_string(),
        String::new(),
        "### Instructions".to_string(),
        skill.instructions.clone(),
        String::new(),
        "### Output Format".to_string(),
        skill.output_format.clone(),
    ];

    if let Some(criteria) = skill.quality_criteria.as_deref().filter(|c| !c.is_empty()) {
        parts.push(String::new());
        parts.push("### Quality Criteria".to_string());
        parts.push(criteria.to_string());
    }

    parts.join("\n")
}
