//! Organizational context: per-org markdown documents injected into every
//! system prompt.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orgclaw_core::error::ContextError;
use tracing::{debug, warn};

/// Files always injected under "Strategy & Structure".
const CORE_FILES: &[&str] = &["strategy.md", "team_structure.md", "team-structure.md"];

/// Assembled context for one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgContext {
    /// Strategy and team structure
    pub core: String,
    /// Every other context document
    pub relevant: String,
    pub estimated_tokens: u64,
}

impl OrgContext {
    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.relevant.is_empty()
    }
}

/// Supplies organizational context for a turn.
#[async_trait]
pub trait ContextSupplier: Send + Sync {
    /// `query` is the user's current message, for suppliers that rank by
    /// relevance.
    async fn org_context(&self, org_id: &str, query: Option<&str>)
    -> Result<OrgContext, ContextError>;
}

/// Reads `<root>/<org_id>/context/*.md`.
pub struct DirectoryContextSupplier {
    root: PathBuf,
    max_tokens: u64,
}

impl DirectoryContextSupplier {
    pub fn new(root: impl Into<PathBuf>, max_tokens: u64) -> Self {
        Self {
            root: root.into(),
            max_tokens,
        }
    }

    fn context_dir(&self, org_id: &str) -> PathBuf {
        self.root.join(org_id).join("context")
    }

    async fn markdown_files(dir: &Path) -> Result<Vec<PathBuf>, ContextError> {
        let read_err = |e: std::io::Error| ContextError::Read {
            path: dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ContextSupplier for DirectoryContextSupplier {
    async fn org_context(
        &self,
        org_id: &str,
        _query: Option<&str>,
    ) -> Result<OrgContext, ContextError> {
        let dir = self.context_dir(org_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(org_id, dir = %dir.display(), "No context directory for org");
            return Ok(OrgContext::default());
        }

        let max_chars = self.max_tokens * 4;
        let mut total_chars: u64 = 0;
        let mut core = Vec::new();
        let mut relevant = Vec::new();

        for path in Self::markdown_files(&dir).await? {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(org_id, file = %path.display(), error = %e, "Failed to read context file");
                    continue;
                }
            };
            let content = raw.trim();
            if content.is_empty() {
                continue;
            }

            let chars = content.chars().count() as u64;
            if total_chars + chars > max_chars {
                debug!(
                    org_id,
                    file = %path.display(),
                    total_chars,
                    "Skipping context file, token budget exhausted"
                );
                continue;
            }
            total_chars += chars;

            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if CORE_FILES.contains(&name) {
                core.push(content.to_string());
            } else {
                relevant.push(content.to_string());
            }
        }

        Ok(OrgContext {
            core: core.join("\n\n"),
            relevant: relevant.join("\n\n"),
            estimated_tokens: total_chars.div_ceil(4),
        })
    }
}

/// Render the organizational-context section of the system prompt.
pub fn build_context_prompt(context: &OrgContext) -> String {
    let mut parts = vec![
        "## Organizational Context".to_string(),
        String::new(),
        "You are a personal AI assistant within this organization. Use the following context to provide strategically aware responses.".to_string(),
        String::new(),
    ];

    if !context.core.is_empty() {
        parts.push("### Strategy & Structure".into());
        parts.push(context.core.clone());
        parts.push(String::new());
    }

    if !context.relevant.is_empty() {
        parts.push("### Relevant Context".into());
        parts.push(context.relevant.clone());
        parts.push(String::new());
    }

    parts.join("\n")
}
