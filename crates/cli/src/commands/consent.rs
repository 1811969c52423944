//! `orgclaw consent`: consent administration for one instance.

use std::sync::Arc;

use clap::Subcommand;
use orgclaw_agent::ConsentManager;
use orgclaw_core::consent::{ConsentRecord, ConsentType};
use orgclaw_core::store::ConsentStore;

use super::{CommandResult, OpenStore, load_config, open_store};

#[derive(Debug, Subcommand)]
pub enum ConsentAction {
    /// Grant consent for one activity
    Grant {
        #[arg(long)]
        instance: String,

        /// e.g. data_processing, memory_storage, pattern_collection
        #[arg(long = "type")]
        consent_type: String,

        /// Consent text version
        #[arg(long)]
        version: Option<String>,
    },

    /// Withdraw consent for one activity
    Withdraw {
        #[arg(long)]
        instance: String,

        #[arg(long = "type")]
        consent_type: String,
    },

    /// Show every consent record for an instance
    List {
        #[arg(long)]
        instance: String,
    },
}

pub async fn run(action: ConsentAction) -> CommandResult {
    let config = load_config()?;
    match open_store(&config).await? {
        OpenStore::Sqlite(store) => execute(store, action).await,
        OpenStore::Memory(store) => execute(store, action).await,
    }
}

async fn execute<S: ConsentStore + 'static>(store: Arc<S>, action: ConsentAction) -> CommandResult {
    let consent = ConsentManager::new(store);

    match action {
        ConsentAction::Grant {
            instance,
            consent_type,
            version,
        } => {
            let consent_type: ConsentType = consent_type.parse()?;
            let record = consent
                .grant(&instance, consent_type, version.as_deref())
                .await?;
            println!("Granted {} (version {})", record.consent_type, record.version);
        }
        ConsentAction::Withdraw {
            instance,
            consent_type,
        } => {
            let consent_type: ConsentType = consent_type.parse()?;
            consent.withdraw(&instance, consent_type).await?;
            println!("Withdrew {consent_type}");
        }
        ConsentAction::List { instance } => {
            let records = consent.list(&instance).await?;
            if records.is_empty() {
                println!("No consent records for {instance}");
            }
            for record in &records {
                println!("{}", describe(record));
            }
        }
    }

    Ok(())
}

fn describe(record: &ConsentRecord) -> String {
    let state = if record.granted { "granted" } else { "withdrawn" };
    let when = match (record.granted, record.granted_at, record.withdrawn_at) {
        (true, Some(at), _) => at.to_rfc3339(),
        (false, _, Some(at)) => at.to_rfc3339(),
        _ => "-".into(),
    };
    format!(
        "  {:<24} {:<10} v{:<6} {}",
        record.consent_type.as_str(),
        state,
        record.version,
        when
    )
}
