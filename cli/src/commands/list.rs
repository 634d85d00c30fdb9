//! `skr list` command.

use std::path::{Path, PathBuf};

use clap::Args;
use skr_core::config::{find_agent_skills_dir, global_install_root};
use skr_runtime::Skill;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only list globally installed skills
    #[arg(short, long)]
    pub global: bool,

    /// Only show skill names
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut roots: Vec<(&str, PathBuf)> = Vec::new();
    if !args.global {
        if let Some(dir) = find_agent_skills_dir(&std::env::current_dir()?) {
            roots.push(("project", dir));
        }
    }
    roots.push(("global", global_install_root()?));

    let mut table = output::new_table(&["NAME", "VERSION", "SCOPE", "DESCRIPTION"]);
    for (scope, root) in &roots {
        for skill in installed_skills(root) {
            if args.quiet {
                println!("{}", skill.name);
                continue;
            }
            table.add_row([
                skill.name.as_str(),
                skill.metadata.version.as_deref().unwrap_or("-"),
                *scope,
                skill.description.as_str(),
            ]);
        }
    }

    if !args.quiet {
        println!("{table}");
    }
    Ok(())
}

/// Skills installed directly under `root`, sorted by name.
///
/// Staging leftovers and directories without a readable `SKILL.md` are skipped.
fn installed_skills(root: &Path) -> Vec<Skill> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut skills: Vec<Skill> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| match Skill::load_unverified(&entry.path()) {
            Ok(skill) => Some(skill),
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping directory");
                None
            }
        })
        .collect();
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}
