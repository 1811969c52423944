//! `orgclaw sessions`: session administration.

use std::sync::Arc;

use clap::Subcommand;
use orgclaw_agent::{PipelineConfig, SessionManager};
use orgclaw_config::AppConfig;
use orgclaw_core::store::SessionStore;

use super::{CommandResult, OpenStore, load_config, open_store};

#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// Most recent sessions of an instance
    List {
        #[arg(long)]
        instance: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Close a session with a final summary
    Close { session_id: String },

    /// Fold older messages of a session into its summary
    Compact { session_id: String },

    /// Expire sessions idle for longer than the given minutes
    Expire {
        /// Defaults to `session.idle_expiry_minutes`
        #[arg(long)]
        minutes: Option<i64>,
    },
}

pub async fn run(action: SessionAction) -> CommandResult {
    let config = load_config()?;
    match open_store(&config).await? {
        OpenStore::Sqlite(store) => execute(store, &config, action).await,
        OpenStore::Memory(store) => execute(store, &config, action).await,
    }
}

async fn execute<S: SessionStore + 'static>(
    store: Arc<S>,
    config: &AppConfig,
    action: SessionAction,
) -> CommandResult {
    let settings = PipelineConfig::from_app_config(config).session;
    let sessions = SessionManager::new(store, settings);

    match action {
        SessionAction::List { instance, limit } => {
            let recent = sessions.recent_sessions(&instance, limit).await?;
            if recent.is_empty() {
                println!("No sessions for {instance}");
            }
            for s in &recent {
                println!(
                    "  {}  {:<8} {:<9} msgs={:<4} tokens={:<6} last={}",
                    s.session_id,
                    s.channel_type,
                    s.status.as_str(),
                    s.message_count,
                    s.token_count,
                    s.last_activity_at.to_rfc3339()
                );
            }
        }
        SessionAction::Close { session_id } => {
            sessions.close_session(&session_id).await?;
            println!("Closed {session_id}");
        }
        SessionAction::Compact { session_id } => {
            let outcome = sessions.compact_session(&session_id).await?;
            if outcome.compacted {
                println!(
                    "Compacted {} messages of {session_id}",
                    outcome.messages_compacted
                );
            } else {
                println!("Nothing to compact in {session_id}");
            }
        }
        SessionAction::Expire { minutes } => {
            let minutes = minutes.unwrap_or(config.session.idle_expiry_minutes);
            if minutes < 0 {
                return Err("--minutes must not be negative".into());
            }
            let count = sessions.expire_stale_sessions(minutes).await?;
            println!("Expired {count} session(s) idle for {minutes}+ minutes");
        }
    }

    Ok(())
}
