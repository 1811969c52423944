//! End-to-end tests for the OrgClaw message pipeline.
//!
//! These run the full turn over a real SQLite store: channel identity
//! resolution, consent gates, session continuity across channels, memory,
//! org context, skills and pattern logging.

use std::sync::{Arc, Mutex};

use orgclaw_agent::pipeline::{CONSENT_NOTICE, UNKNOWN_USER_NOTICE};
use orgclaw_agent::{
    ConsentManager, DirectoryContextSupplier, MessagePipeline, PipelineConfig, PipelineFailure,
    Skill, SkillRegistry,
};
use orgclaw_channels::ChannelRegistry;
use orgclaw_core::agent::AgentExecutor;
use orgclaw_core::channel::{Channel, ChannelMessage};
use orgclaw_core::consent::ConsentType;
use orgclaw_core::error::{ChannelError, ExecutionError};
use orgclaw_core::store::{PatternStore, SessionStore, TenantStore};
use orgclaw_core::tenant::{ChannelBinding, InstanceStatus, UserInstance};
use orgclaw_store::SqliteStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ── Mock collaborators ──────────────────────────────────────────────────

/// A channel that records what it was asked to deliver.
struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(&self, routing_key: &str, content: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((routing_key.to_string(), content.to_string()));
        Ok(())
    }
}

/// Replies with a fixed text and keeps every system prompt it saw.
struct EchoExecutor {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl EchoExecutor {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AgentExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "e2e_echo"
    }

    async fn execute(
        &self,
        system_prompt: &str,
        _user_text: &str,
        _instance: &UserInstance,
    ) -> Result<String, ExecutionError> {
        self.prompts.lock().unwrap().push(system_prompt.to_string());
        Ok(self.reply.clone())
    }
}

// ── Fixture ─────────────────────────────────────────────────────────────

struct World {
    store: Arc<SqliteStore>,
    cli: Arc<RecordingChannel>,
    slack: Arc<RecordingChannel>,
    executor: Arc<EchoExecutor>,
    pipeline: MessagePipeline,
    _context_dir: TempDir,
}

async fn world() -> World {
    let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());

    let context_dir = TempDir::new().unwrap();
    let org_dir = context_dir.path().join("acme").join("context");
    std::fs::create_dir_all(&org_dir).unwrap();
    std::fs::write(
        org_dir.join("strategy.md"),
        "# Strategy\n\nGrow enterprise revenue 40% this year.",
    )
    .unwrap();

    let skills = SkillRegistry::new(vec![Skill {
        id: "weekly-update".into(),
        name: "Weekly Update".into(),
        category: Some("communication".into()),
        slash_command: Some("/weekly".into()),
        instructions: "Turn the notes into a weekly status update.".into(),
        output_format: "Done, Next, Blockers.".into(),
        quality_criteria: None,
    }])
    .unwrap();

    let cli = RecordingChannel::new("cli");
    let slack = RecordingChannel::new("slack");
    let mut channels = ChannelRegistry::new();
    channels.register(cli.clone());
    channels.register(slack.clone());

    let executor = EchoExecutor::new("Noted.");
    let pipeline = MessagePipeline::new(
        store.clone(),
        Arc::new(channels),
        executor.clone(),
        Arc::new(skills),
        Arc::new(DirectoryContextSupplier::new(context_dir.path(), 10_000)),
        PipelineConfig::default(),
    );

    World {
        store,
        cli,
        slack,
        executor,
        pipeline,
        _context_dir: context_dir,
    }
}

/// An active instance for alice, reachable from the terminal and Slack.
async fn provision_alice(store: &SqliteStore) -> UserInstance {
    let mut alice = UserInstance::new("alice", "acme", "platform", "engineer");
    alice.status = InstanceStatus::Active;
    store.insert_instance(&alice).await.unwrap();
    store
        .insert_binding(&ChannelBinding::for_instance(&alice, "cli", "local", "alice"))
        .await
        .unwrap();
    store
        .insert_binding(&ChannelBinding::for_instance(&alice, "slack", "T9", "U42"))
        .await
        .unwrap();
    alice
}

fn from_cli(text: &str) -> ChannelMessage {
    ChannelMessage::new("cli:local:alice", "alice", text)
}

fn from_slack(text: &str) -> ChannelMessage {
    ChannelMessage::new("slack:T9:D77", "U42", text)
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_consented_user_gets_enriched_prompts_across_channels() {
    let w = world().await;
    let alice = provision_alice(&w.store).await;
    let consent = ConsentManager::new(w.store.clone());
    consent
        .grant(&alice.instance_id, ConsentType::DataProcessing, None)
        .await
        .unwrap();
    consent
        .grant(&alice.instance_id, ConsentType::PatternCollection, None)
        .await
        .unwrap();

    // Turn 1: a preference worth remembering
    let first = w
        .pipeline
        .handle_inbound(&from_cli("I prefer bullet points over long paragraphs."))
        .await;
    assert!(first.success, "first turn failed: {:?}", first.error);
    assert_eq!(first.instance_id.as_deref(), Some(alice.instance_id.as_str()));
    assert_eq!(w.cli.sent(), [("cli:local:alice".to_string(), "Noted.".to_string())]);

    // Turn 2: a slash command activates the skill, everything learned so far is in the prompt
    let second = w
        .pipeline
        .handle_inbound(&from_cli("/weekly shipped the importer"))
        .await;
    assert!(second.success);
    assert_eq!(second.skill_id.as_deref(), Some("weekly-update"));

    let prompt = w.executor.last_prompt();
    assert!(prompt.starts_with("# OrgClaw Assistant"));
    assert!(prompt.contains("Grow enterprise revenue 40% this year."));
    assert!(prompt.contains("## Personal Memory"));
    assert!(prompt.contains("- I prefer bullet points over long paragraphs."));
    assert!(prompt.contains("user [cli]: I prefer bullet points over long paragraphs."));
    assert!(prompt.contains("assistant [cli]: Noted."));
    assert!(prompt.contains("## Active Skill: Weekly Update"));
    assert!(!prompt.contains(&alice.instance_id));

    // Turn 3: same person on Slack continues the same conversation
    let third = w
        .pipeline
        .handle_inbound(&from_slack("what did I ship this week?"))
        .await;
    assert!(third.success);
    assert!(third.skill_id.is_none());
    assert!(
        w.executor
            .last_prompt()
            .contains("user [cli]: /weekly shipped the importer")
    );
    assert_eq!(w.slack.sent().len(), 1);
    assert_eq!(w.slack.sent()[0].0, "slack:T9:D77");
    assert_eq!(w.cli.sent().len(), 2);

    let sessions = w
        .store
        .list_recent_sessions(&alice.instance_id, 10)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].channel_type, "cli");
    assert_eq!(sessions[0].message_count, 6);

    // One anonymized pattern per completed turn
    let patterns = w.store.list_patterns("acme").await.unwrap();
    assert_eq!(patterns.len(), 3);
    assert!(patterns.iter().all(|p| p.user_id_hash != "alice"));
    assert!(patterns.iter().all(|p| p.team_id == "platform"));
}

#[tokio::test]
async fn e2e_missing_consent_stops_before_any_record_is_written() {
    let w = world().await;
    let alice = provision_alice(&w.store).await;

    let result = w.pipeline.handle_inbound(&from_cli("hello")).await;

    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(PipelineFailure::ConsentRequired(ConsentType::DataProcessing))
    ));
    assert_eq!(w.cli.sent()[0].1, CONSENT_NOTICE);
    assert!(w.executor.prompts.lock().unwrap().is_empty());
    assert!(
        w.store
            .list_recent_sessions(&alice.instance_id, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn e2e_unbound_sender_is_told_to_contact_an_admin() {
    let w = world().await;
    provision_alice(&w.store).await;

    let result = w
        .pipeline
        .handle_inbound(&ChannelMessage::new("slack:T9:D77", "U-stranger", "hi"))
        .await;

    assert!(matches!(result.error, Some(PipelineFailure::UnknownUser)));
    assert!(result.instance_id.is_none());
    assert_eq!(
        w.slack.sent(),
        [("slack:T9:D77".to_string(), UNKNOWN_USER_NOTICE.to_string())]
    );
}

#[tokio::test]
async fn e2e_suspended_instance_is_refused() {
    let w = world().await;
    let alice = provision_alice(&w.store).await;
    ConsentManager::new(w.store.clone())
        .grant(&alice.instance_id, ConsentType::DataProcessing, None)
        .await
        .unwrap();
    w.store
        .update_instance_status(&alice.instance_id, InstanceStatus::Suspended)
        .await
        .unwrap();

    let result = w.pipeline.handle_inbound(&from_cli("hello")).await;

    assert!(matches!(
        result.error,
        Some(PipelineFailure::InstanceNotActive(InstanceStatus::Suspended))
    ));
    assert!(w.cli.sent()[0].1.contains("suspended"));
}

#[tokio::test]
async fn e2e_withdrawn_pattern_consent_stops_pattern_logging() {
    let w = world().await;
    let alice = provision_alice(&w.store).await;
    let consent = ConsentManager::new(w.store.clone());
    consent
        .grant(&alice.instance_id, ConsentType::DataProcessing, None)
        .await
        .unwrap();
    consent
        .grant(&alice.instance_id, ConsentType::PatternCollection, None)
        .await
        .unwrap();

    assert!(w.pipeline.handle_inbound(&from_cli("first")).await.success);
    consent
        .withdraw(&alice.instance_id, ConsentType::PatternCollection)
        .await
        .unwrap();
    assert!(w.pipeline.handle_inbound(&from_cli("second")).await.success);

    assert_eq!(w.store.list_patterns("acme").await.unwrap().len(), 1);
}

#[tokio::test]
async fn e2e_expired_session_is_not_resumed() {
    let w = world().await;
    let alice = provision_alice(&w.store).await;
    ConsentManager::new(w.store.clone())
        .grant(&alice.instance_id, ConsentType::DataProcessing, None)
        .await
        .unwrap();

    assert!(w.pipeline.handle_inbound(&from_cli("morning")).await.success);
    let expired = w.pipeline.sessions().expire_stale_sessions(0).await.unwrap();
    assert_eq!(expired, 1);

    assert!(w.pipeline.handle_inbound(&from_cli("afternoon")).await.success);
    assert!(!w.executor.last_prompt().contains("morning"));

    let sessions = w
        .store
        .list_recent_sessions(&alice.instance_id, 10)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].message_count, 2);
}
