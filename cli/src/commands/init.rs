//! `skr init` command.

use clap::Args;
use skr_core::config::{AgentConfig, ProjectConfig, CONFIG_FILE_NAME};

#[derive(Args)]
pub struct InitArgs {
    /// Agent the project is configured for
    #[arg(short, long, default_value = "antigravity")]
    pub agent: String,
}

pub async fn execute(args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;

    let config_path = cwd.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        return Err(format!("Configuration file already exists at {}", config_path.display()).into());
    }

    let skills_dir = cwd.join(".agent").join("skills");
    std::fs::create_dir_all(&skills_dir)
        .map_err(|e| format!("Failed to create {}: {}", skills_dir.display(), e))?;

    let config = ProjectConfig {
        agent: AgentConfig { kind: args.agent },
        skills: Vec::new(),
    };
    config.save(&cwd)?;

    println!("Initialized skr project in {}", cwd.display());
    println!("Created {}", skills_dir.display());
    println!("Created {} with agent: {}", CONFIG_FILE_NAME, config.agent.kind);
    Ok(())
}
