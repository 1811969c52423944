//! `orgclaw provision`: create a user instance and its first channel binding.

use std::sync::Arc;

use clap::Args;
use orgclaw_core::store::TenantStore;
use orgclaw_core::tenant::{AccessMode, ChannelBinding, InstanceStatus, UserInstance};

use super::{CommandResult, OpenStore, load_config, open_store};

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Underlying user id
    #[arg(long)]
    pub user: String,

    /// Organization id
    #[arg(long)]
    pub org: String,

    /// Team id within the organization
    #[arg(long)]
    pub team: String,

    /// Role category (e.g. "sales", "engineer")
    #[arg(long)]
    pub role: String,

    /// "forward" or "full"
    #[arg(long, default_value = "forward")]
    pub access: String,

    /// Channel type of the binding
    #[arg(long, default_value = "cli")]
    pub channel: String,

    /// Channel-side org reference (defaults to the org id)
    #[arg(long)]
    pub org_ref: Option<String>,

    /// Channel-side user reference (defaults to the user id)
    #[arg(long)]
    pub user_ref: Option<String>,

    /// Leave the instance in `provisioning` instead of activating it
    #[arg(long)]
    pub inactive: bool,
}

pub async fn run(args: ProvisionArgs) -> CommandResult {
    let config = load_config()?;
    match open_store(&config).await? {
        OpenStore::Sqlite(store) => provision(store, &args).await?,
        OpenStore::Memory(store) => provision(store, &args).await?,
    };
    Ok(())
}

/// Insert the instance, bind the channel identity, then activate.
pub async fn provision<S: TenantStore + 'static>(
    store: Arc<S>,
    args: &ProvisionArgs,
) -> Result<UserInstance, Box<dyn std::error::Error>> {
    let access: AccessMode = args.access.parse()?;

    let mut instance = UserInstance::new(&args.user, &args.org, &args.team, &args.role);
    instance.access_mode = access;
    store.insert_instance(&instance).await?;

    let binding = ChannelBinding::for_instance(
        &instance,
        &args.channel,
        args.org_ref.as_deref().unwrap_or(&args.org),
        args.user_ref.as_deref().unwrap_or(&args.user),
    );
    store.insert_binding(&binding).await?;

    if !args.inactive {
        store
            .update_instance_status(&instance.instance_id, InstanceStatus::Active)
            .await?;
        instance.status = InstanceStatus::Active;
    }

    tracing::info!(
        instance_id = %instance.instance_id,
        org_id = %instance.org_id,
        channel = %binding.channel_type,
        "Provisioned user instance"
    );

    println!("Provisioned instance {}", instance.instance_id);
    println!("  User:     {} ({})", instance.user_id, instance.role_category);
    println!("  Org/Team: {} / {}", instance.org_id, instance.team_id);
    println!("  Access:   {}", instance.access_mode.as_str());
    println!("  Status:   {}", instance.status);
    println!(
        "  Binding:  {}:{}:{}",
        binding.channel_type, binding.channel_org_ref, binding.channel_user_ref
    );

    Ok(instance)
}
