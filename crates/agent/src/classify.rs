//! Usage classification: which kind of work a turn was.

use serde::{Deserialize, Serialize};

/// Top-level work category of one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Communication,
    Analysis,
    Creation,
    Coordination,
    Strategy,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Communication,
        Self::Analysis,
        Self::Creation,
        Self::Coordination,
        Self::Strategy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Communication => "communication",
            Self::Analysis => "analysis",
            Self::Creation => "creation",
            Self::Coordination => "coordination",
            Self::Strategy => "strategy",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Communication => &[
                "email", "message", "reply", "respond", "write", "draft", "send", "forward",
                "summarize", "summary", "meeting", "notes", "update", "announce", "notification",
                "slack", "teams",
            ],
            Self::Analysis => &[
                "analyze", "analysis", "data", "report", "dashboard", "metric", "trend", "compare",
                "benchmark", "insight", "chart", "graph", "spreadsheet", "calculate", "forecast",
                "predict", "statistics",
            ],
            Self::Creation => &[
                "create", "build", "design", "generate", "write", "produce", "develop",
                "prototype", "mockup", "template", "document", "blog", "article", "presentation",
                "slide", "content",
            ],
            Self::Coordination => &[
                "schedule", "plan", "organize", "assign", "delegate", "track", "project", "task",
                "deadline", "timeline", "status", "progress", "workflow", "process", "manage",
                "coordinate", "review", "approve",
            ],
            Self::Strategy => &[
                "strategy", "strategic", "decision", "prioritize", "roadmap", "vision", "goal",
                "objective", "initiative", "opportunity", "risk", "competitive", "market",
                "growth", "innovation",
            ],
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns a category to one user/assistant exchange.
pub trait Classifier: Send + Sync {
    fn classify(&self, user_message: &str, reply: &str) -> Category;
}

/// Substring keyword counting over the whole exchange.
///
/// The highest score wins. A tie for the top score, or no hits at all,
/// falls back to `Communication`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn classify(&self, user_message: &str, reply: &str) -> Category {
        let text = format!("{user_message} {reply}").to_lowercase();

        let scores: Vec<(Category, usize)> = Category::ALL
            .iter()
            .map(|c| {
                let hits = c.keywords().iter().filter(|k| text.contains(*k)).count();
                (*c, hits)
            })
            .collect();

        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best == 0 {
            return Category::default();
        }

        let mut leaders = scores.iter().filter(|(_, s)| *s == best);
        match (leaders.next(), leaders.next()) {
            (Some((category, _)), None) => *category,
            _ => Category::default(),
        }
    }
}
