//! `orgclaw init`: First-time setup.

use orgclaw_config::AppConfig;

use super::CommandResult;

const SAMPLE_SKILLS: &str = r#"# Skills are activated by starting a message with their slash command.

[[skills]]
id = "weekly-update"
name = "Weekly Update"
category = "communication"
slash_command = "/weekly"
instructions = "Turn the user's notes into a short weekly status update for their team."
output_format = "Three sections: Done, Next, Blockers. Bullet points, no more than five per section."
quality_criteria = "Every blocker names an owner."
"#;

const SAMPLE_STRATEGY: &str = "# Strategy\n\n\
<!-- Every assistant in this org sees the files under context/. -->\n\
<!-- strategy.md and team_structure.md are shown first; other files follow while budget remains. -->\n";

pub async fn run() -> CommandResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("OrgClaw — First-Time Setup");
    println!("==========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    let config = if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        AppConfig::load_from(&config_path)?
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
        AppConfig::default()
    };

    let skills_path = config.skills_path();
    if !skills_path.exists() {
        std::fs::write(&skills_path, SAMPLE_SKILLS)?;
        println!("  Created sample skills file: {}", skills_path.display());
    }

    let sample_org_context = config.context_root().join("local").join("context");
    if !sample_org_context.exists() {
        std::fs::create_dir_all(&sample_org_context)?;
        std::fs::write(sample_org_context.join("strategy.md"), SAMPLE_STRATEGY)?;
        println!(
            "  Created context directory for org 'local': {}",
            sample_org_context.display()
        );
    }

    println!("\nNext steps:");
    println!("  1. Set ORGCLAW_API_KEY (or api_key in {})", config_path.display());
    println!("  2. orgclaw provision --user me --org local --team core --role engineer");
    println!("  3. orgclaw consent grant --instance <id printed above> --type data_processing");
    println!("  4. orgclaw chat --user-ref me\n");

    Ok(())
}
