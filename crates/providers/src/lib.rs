//! Model-execution adapters for OrgClaw.

pub mod openai_compat;

pub use openai_compat::{ExecutorSettings, OpenAiCompatExecutor};
