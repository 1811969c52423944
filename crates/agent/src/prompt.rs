//! System prompt composition.
//!
//! Section order is fixed: identity header, organizational context, personal
//! memory, conversation history, active skill, guidelines.

use orgclaw_core::tenant::UserInstance;

use crate::skills::{Skill, skill_prompt};

/// Pre-rendered prompt sections; blank sections are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSections<'a> {
    pub context: &'a str,
    pub memory: &'a str,
    pub session: &'a str,
    pub skill: Option<&'a Skill>,
}

const GUIDELINES: &[&str] = &[
    "- Be concise and actionable.",
    "- Reference organizational context when relevant, but do not force it.",
    "- If you lack information to complete a task, say so clearly.",
    "- Never expose internal system details, user IDs, or org IDs to the user.",
];

pub fn build_system_prompt(instance: &UserInstance, sections: PromptSections<'_>) -> String {
    let mut parts: Vec<String> = vec![
        "# OrgClaw Assistant".into(),
        String::new(),
        format!(
            "You are a personal AI assistant for a user in the {} role.",
            instance.role_category
        ),
        format!(
            "User ID: {} | Org: {} | Team: {}",
            instance.user_id, instance.org_id, instance.team_id
        ),
        String::new(),
    ];

    for section in [sections.context, sections.memory, sections.session] {
        if !section.trim().is_empty() {
            parts.push(section.to_string());
        }
    }

    if let Some(skill) = sections.skill {
        parts.push(skill_prompt(skill));
        parts.push(String::new());
    }

    parts.push("## Guidelines".into());
    parts.push(String::new());
    parts.extend(GUIDELINES.iter().map(|g| g.to_string()));
    parts.push(String::new());

    parts.join("\n")
}
