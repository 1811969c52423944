//! Personal memory: store, recall and extract what the assistant learns
//! about one user.
//!
//! Recall is keyword matching plus a recency bonus. Extraction is a fixed set
//! of phrase heuristics over the user's message; the reply is not mined.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use orgclaw_core::error::StoreError;
use orgclaw_core::memory::{MemoryQuery, MemoryRecord, MemoryType};
use orgclaw_core::store::MemoryStore;
use regex_lite::Regex;
use tracing::{debug, info};

type MemoryResult<T> = Result<T, StoreError>;

const DEFAULT_RECALL_LIMIT: usize = 10;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "at", "by", "for", "with", "about", "between", "to", "from", "in", "on", "up",
    "out", "if", "or", "and", "but", "not", "no", "so", "as", "it", "its", "that", "this",
    "these", "those", "i", "me", "my", "we", "our", "you", "your", "he", "she", "they", "them",
    "what", "which", "who", "when", "where", "how", "why", "all", "each", "every", "both", "few",
    "more", "most", "other", "some", "such", "than", "too", "very", "just", "also",
];

struct ExtractionGroup {
    memory_type: MemoryType,
    confidence: f32,
    patterns: Vec<Regex>,
}

fn group(memory_type: MemoryType, confidence: f32, patterns: &[&str]) -> ExtractionGroup {
    ExtractionGroup {
        memory_type,
        confidence,
        patterns: patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
    }
}

static EXTRACTION_GROUPS: LazyLock<Vec<ExtractionGroup>> = LazyLock::new(|| {
    vec![
        group(
            MemoryType::Preference,
            0.8,
            &[
                r"(?i)\bi (?:prefer|like|always|usually|tend to|want|love|hate|dislike|never)\b",
                r"(?i)\bmy preference is\b",
                r"(?i)\bi'd rather\b",
                r"(?i)\bi(?:'d| would) (?:prefer|like)\b",
            ],
        ),
        group(
            MemoryType::Relationship,
            0.7,
            &[
                r"(?i)\bmy (?:team|manager|boss|colleague|report|direct report|coworker)\b",
                r"(?i)\bi work with\b",
                r"(?i)\b(\w+) is my\b",
                r"(?i)\bmy (?:team|department|group) (?:is|includes|has)\b",
            ],
        ),
        group(
            MemoryType::Decision,
            0.8,
            &[
                r"(?i)\bwe decided\b",
                r"(?i)\bthe decision (?:was|is)\b",
                r"(?i)\bwe(?:'ve| have) agreed\b",
                r"(?i)\bit was decided\b",
                r"(?i)\bour decision\b",
            ],
        ),
        group(
            MemoryType::Fact,
            0.7,
            &[
                r"(?i)\bremember that\b",
                r"(?i)\bkeep in mind\b",
                r"(?i)\bfor (?:your|the) record\b",
                r"(?i)\bfyi\b",
                r"(?i)\bnote that\b",
            ],
        ),
    ]
});

static EXPLICIT_REMEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^remember:\s*(.+)$").unwrap());

/// Options for [`MemoryManager::store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub source_channel: Option<String>,
    pub confidence: f32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            source_channel: None,
            confidence: 1.0,
            expires_at: None,
        }
    }
}

/// Options for [`MemoryManager::recall`].
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    /// Defaults to 10
    pub limit: Option<usize>,
    /// Empty = any type
    pub types: Vec<MemoryType>,
    pub min_confidence: f32,
}

/// A memory candidate found in a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub confidence: f32,
}

pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    prompt_recall_limit: usize,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            prompt_recall_limit: 5,
        }
    }

    /// How many recalled memories the prompt section may carry.
    pub fn with_prompt_recall_limit(mut self, limit: usize) -> Self {
        self.prompt_recall_limit = limit;
        self
    }

    pub async fn store(
        &self,
        instance_id: &str,
        memory_type: MemoryType,
        content: &str,
        opts: StoreOptions,
    ) -> MemoryResult<MemoryRecord> {
        debug!(
            instance_id,
            memory_type = %memory_type,
            content_length = content.len(),
            "Storing memory"
        );
        let mut record = MemoryRecord::new(instance_id, memory_type, content);
        record.source_channel = opts.source_channel;
        record.confidence = opts.confidence;
        record.expires_at = opts.expires_at;
        self.store.insert_memory(&record).await?;
        Ok(record)
    }

    /// Memories relevant to `query`, best first.
    ///
    /// Without usable keywords this falls back to the most recent memories.
    pub async fn recall(
        &self,
        instance_id: &str,
        query: &str,
        opts: RecallOptions,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        let limit = opts.limit.unwrap_or(DEFAULT_RECALL_LIMIT);
        let keywords = extract_keywords(query);

        if keywords.is_empty() {
            return self
                .store
                .query_memories(
                    instance_id,
                    &MemoryQuery {
                        limit,
                        ..MemoryQuery::default()
                    },
                )
                .await;
        }

        let candidates = self
            .store
            .query_memories(
                instance_id,
                &MemoryQuery {
                    memory_type: None,
                    keywords: keywords.clone(),
                    limit: limit.saturating_mul(3),
                },
            )
            .await?;

        let now = Utc::now();
        let mut scored: Vec<(f64, MemoryRecord)> = candidates
            .into_iter()
            .filter(|m| opts.types.is_empty() || opts.types.contains(&m.memory_type))
            .filter(|m| opts.min_confidence <= 0.0 || m.confidence >= opts.min_confidence)
            .map(|m| (score(&m, &keywords, now), m))
            .collect();

        // Stable: equal scores keep most-recently-updated first
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let top: Vec<MemoryRecord> = scored.into_iter().take(limit).map(|(_, m)| m).collect();

        for memory in &top {
            if let Err(e) = self.store.record_access(&memory.memory_id).await {
                debug!(memory_id = %memory.memory_id, error = %e, "Failed to record memory access");
            }
        }

        Ok(top)
    }

    /// Render the personal-memory section of the system prompt.
    ///
    /// Empty when nothing is known about the user.
    pub async fn build_memory_prompt(
        &self,
        instance_id: &str,
        query: Option<&str>,
    ) -> MemoryResult<String> {
        let preferences = self.recent_of_type(instance_id, MemoryType::Preference, 5).await?;
        let relationships = self
            .recent_of_type(instance_id, MemoryType::Relationship, 3)
            .await?;
        let facts = self.recent_of_type(instance_id, MemoryType::Fact, 5).await?;

        let mut relevant = match query.filter(|q| !q.is_empty()) {
            Some(q) => {
                self.recall(
                    instance_id,
                    q,
                    RecallOptions {
                        limit: Some(self.prompt_recall_limit),
                        ..RecallOptions::default()
                    },
                )
                .await?
            }
            None => Vec::new(),
        };
        let shown: HashSet<&str> = preferences
            .iter()
            .chain(&relationships)
            .chain(&facts)
            .map(|m| m.memory_id.as_str())
            .collect();
        relevant.retain(|m| !shown.contains(m.memory_id.as_str()));

        if preferences.is_empty() && relationships.is_empty() && facts.is_empty() && relevant.is_empty()
        {
            return Ok(String::new());
        }

        let mut parts = vec![
            "## Personal Memory".to_string(),
            String::new(),
            "You have learned the following about this user from previous interactions:".into(),
            String::new(),
        ];

        for (heading, memories) in [
            ("### Preferences", &preferences),
            ("### Relationships", &relationships),
            ("### Known Facts", &facts),
        ] {
            if memories.is_empty() {
                continue;
            }
            parts.push(heading.to_string());
            parts.extend(memories.iter().map(|m| format!("- {}", m.content)));
            parts.push(String::new());
        }

        if !relevant.is_empty() {
            parts.push("### Relevant Context".into());
            parts.extend(
                relevant
                    .iter()
                    .map(|m| format!("- [{}] {}", m.memory_type, m.content)),
            );
            parts.push(String::new());
        }

        Ok(parts.join("\n"))
    }

    /// Soft-delete one memory. Returns `false` if it did not exist.
    pub async fn forget(&self, memory_id: &str) -> MemoryResult<bool> {
        let deleted = self.store.soft_delete_memory(memory_id).await?;
        if deleted {
            info!(memory_id, "Memory soft-deleted");
        }
        Ok(deleted)
    }

    /// Soft-delete every memory of an instance.
    pub async fn forget_all(&self, instance_id: &str) -> MemoryResult<u64> {
        let count = self.store.soft_delete_all_memories(instance_id).await?;
        info!(instance_id, count, "All memories soft-deleted for instance");
        Ok(count)
    }

    /// Physically remove memories past their expiry.
    pub async fn prune_expired(&self) -> MemoryResult<u64> {
        let count = self.store.delete_expired_memories(Utc::now()).await?;
        if count > 0 {
            info!(count, "Pruned expired memories");
        }
        Ok(count)
    }

    async fn recent_of_type(
        &self,
        instance_id: &str,
        memory_type: MemoryType,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        self.store
            .query_memories(
                instance_id,
                &MemoryQuery {
                    memory_type: Some(memory_type),
                    keywords: Vec::new(),
                    limit,
                },
            )
            .await
    }
}

fn score(memory: &MemoryRecord, keywords: &[String], now: DateTime<Utc>) -> f64 {
    let content = memory.content.to_lowercase();
    let hits = keywords.iter().filter(|k| content.contains(k.as_str())).count() as f64;

    let age_hours = (now - memory.updated_at).num_minutes() as f64 / 60.0;
    let recency = if age_hours < 24.0 {
        0.5
    } else if age_hours < 168.0 {
        0.2
    } else {
        0.0
    };

    hits + recency + f64::from(memory.confidence) * 0.1
}

/// Lower-cased content words of `query`: punctuation stripped, words shorter
/// than three characters and stop-words dropped.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Find memory-worthy statements in a user message.
///
/// An explicit `remember: ...` line is a fact with full confidence. Each
/// heuristic group then contributes at most one snippet: the sentence around
/// its first matching pattern.
pub fn extract_memories(user_message: &str, _reply: &str) -> Vec<ExtractedMemory> {
    let mut extracted = Vec::new();

    if let Some(content) = EXPLICIT_REMEMBER
        .captures(user_message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
    {
        extracted.push(ExtractedMemory {
            memory_type: MemoryType::Fact,
            content: content.to_string(),
            confidence: 1.0,
        });
    }

    for group in EXTRACTION_GROUPS.iter() {
        let Some(found) = group.patterns.iter().find_map(|p| p.find(user_message)) else {
            continue;
        };

        let snippet = enclosing_sentence(user_message, found.start(), found.end());
        if snippet.chars().count() <= 10 {
            continue;
        }
        let lower = snippet.to_lowercase();
        if extracted.iter().any(|e| e.content.to_lowercase() == lower) {
            continue;
        }
        extracted.push(ExtractedMemory {
            memory_type: group.memory_type,
            content: snippet.to_string(),
            confidence: group.confidence,
        });
    }

    extracted
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// The sentence containing `[start, end)`, trailing punctuation included.
fn enclosing_sentence(text: &str, start: usize, end: usize) -> &str {
    let from = text[..start]
        .rfind(is_sentence_end)
        .map(|i| i + 1)
        .unwrap_or(0);
    let to = text[end..]
        .find(is_sentence_end)
        .map(|i| end + i + 1)
        .unwrap_or(text.len());
    text[from..to].trim()
}
