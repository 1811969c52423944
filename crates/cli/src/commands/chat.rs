//! `orgclaw chat`: talk to your assistant through the terminal channel.
//!
//! The terminal is just another channel: lines arrive on
//! `cli:{org_ref}:{user_ref}` and resolve through the same channel bindings,
//! consent checks and sessions as any other platform.

use std::sync::Arc;

use clap::Args;
use orgclaw_agent::{DirectoryContextSupplier, MessagePipeline, PipelineConfig, SkillRegistry};
use orgclaw_channels::{ChannelRegistry, CliChannel};
use orgclaw_config::AppConfig;
use orgclaw_core::channel::{Channel, ChannelMessage};
use orgclaw_core::event::{DomainEvent, EventBus};
use orgclaw_core::store::RecordStore;
use orgclaw_providers::{ExecutorSettings, OpenAiCompatExecutor};
use tracing::debug;

use super::{CommandResult, OpenStore, load_config, open_store};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Channel-side user reference bound at provisioning
    #[arg(long)]
    pub user_ref: String,

    /// Channel-side org reference bound at provisioning
    #[arg(long, default_value = "local")]
    pub org_ref: String,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,
}

pub async fn run(args: ChatArgs) -> CommandResult {
    let config = load_config()?;

    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    ORGCLAW_API_KEY");
        eprintln!("    OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    match open_store(&config).await? {
        OpenStore::Sqlite(store) => chat(store, &config, api_key, args).await,
        OpenStore::Memory(store) => chat(store, &config, api_key, args).await,
    }
}

async fn chat<S: RecordStore + 'static>(
    store: Arc<S>,
    config: &AppConfig,
    api_key: String,
    args: ChatArgs,
) -> CommandResult {
    let executor = OpenAiCompatExecutor::new(
        "openai-compat",
        &config.provider.api_url,
        api_key,
        ExecutorSettings {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
            ..ExecutorSettings::default()
        },
    )?;

    let skills_path = config.skills_path();
    let skills = if skills_path.exists() {
        SkillRegistry::load(&skills_path)?
    } else {
        debug!(path = %skills_path.display(), "No skills file, running without skills");
        SkillRegistry::default()
    };
    let skill_count = skills.len();

    let context = DirectoryContextSupplier::new(config.context_root(), config.context.max_tokens);

    let cli_channel = Arc::new(CliChannel::new(&args.org_ref, &args.user_ref));
    let routing_key = cli_channel.routing_key();
    let mut channels = ChannelRegistry::new();
    channels.register(cli_channel);
    let channels = Arc::new(channels);

    let events = Arc::new(EventBus::default());
    spawn_event_logger(&events);

    let pipeline = MessagePipeline::new(
        store,
        channels.clone(),
        Arc::new(executor),
        Arc::new(skills),
        Arc::new(context),
        PipelineConfig::from_app_config(config),
    )
    .with_event_bus(events);

    pipeline
        .sessions()
        .expire_stale_sessions(config.session.idle_expiry_minutes)
        .await?;

    if let Some(text) = args.message {
        let message = ChannelMessage::new(routing_key, args.user_ref, text);
        let result = pipeline.handle_inbound(&message).await;
        if let Some(err) = result.error {
            return Err(err.to_string().into());
        }
        return Ok(());
    }

    println!();
    println!("  OrgClaw — Interactive Mode");
    println!();
    println!("  Routing:  {routing_key}");
    println!("  Model:    {}", config.provider.model);
    println!("  Skills:   {skill_count} loaded");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut rx = channels
        .start()
        .await
        .map_err(|e| format!("Channel error: {e}"))?;

    while let Some(inbound) = rx.recv().await {
        match inbound {
            Ok(message) => {
                let result = pipeline.handle_inbound(&message).await;
                if let Some(err) = result.error {
                    eprintln!("  [{err}]");
                }
                println!();
            }
            Err(e) => {
                eprintln!("  [Channel Error] {e}");
                break;
            }
        }
    }

    channels.stop().await?;
    println!("  Goodbye!");
    Ok(())
}

/// Log every domain event at debug level.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.as_ref() {
                DomainEvent::ResponseDelivered {
                    session_id,
                    skill,
                    duration_ms,
                    ..
                } => debug!(%session_id, skill = ?skill, duration_ms, "Response delivered"),
                other => debug!(event = ?other, "Domain event"),
            }
        }
    });
}
