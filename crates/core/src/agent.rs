//! Model execution: the opaque call from prompt to reply text.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::tenant::UserInstance;

/// Runs the language model for one turn.
///
/// Timeouts, if any, belong to the implementation; the pipeline awaits the
/// call to completion.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executor name for diagnostics (e.g., "openai_compat").
    fn name(&self) -> &str;

    async fn execute(
        &self,
        system_prompt: &str,
        user_text: &str,
        instance: &UserInstance,
    ) -> std::result::Result<String, ExecutionError>;
}
