//! The conversation core for OrgClaw.
//!
//! Every inbound message runs through one [`MessagePipeline`]:
//!
//! 1. **Resolve** the channel identity to a tenant-scoped user instance
//! 2. **Gate** on instance status and `data_processing` consent
//! 3. **Enrich** with session history, personal memory, org context and an
//!    optional slash-command skill
//! 4. **Execute** the assembled prompt on the model
//! 5. **Deliver** the reply through the channel
//! 6. **Record** the turn, extract memories, classify, and log an anonymized
//!    pattern when consented
//!
//! Each stage is also usable on its own (the CLI's session tooling drives
//! [`SessionManager`] directly).

pub mod classify;
pub mod consent;
pub mod context;
pub mod memory;
pub mod pattern;
pub mod pipeline;
pub mod prompt;
pub mod session;
pub mod skills;
pub mod tenant;
pub mod token;

pub use classify::{Category, Classifier, KeywordClassifier};
pub use consent::ConsentManager;
pub use context::{ContextSupplier, DirectoryContextSupplier, OrgContext, build_context_prompt};
pub use memory::{ExtractedMemory, MemoryManager, RecallOptions, StoreOptions, extract_memories};
pub use pipeline::{MessagePipeline, PipelineConfig, PipelineFailure, PipelineResult};
pub use prompt::{PromptSections, build_system_prompt};
pub use session::{
    AddMessageOptions, CompactionOutcome, HistoryOptions, SessionManager, SessionSettings,
};
pub use skills::{Skill, SkillLoadError, SkillRegistry, skill_prompt};
pub use tenant::{RoutingKey, TenantResolver, parse_routing_key};
pub use token::estimate_tokens;
