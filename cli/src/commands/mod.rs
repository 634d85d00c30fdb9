//! CLI command definitions and dispatch.

mod build;
mod init;
mod inspect;
mod install;
mod list;
mod publish;
mod pull;
mod push;
mod registry;
mod rm;
mod serve;
mod sync;
mod system;
mod tag;
mod untag;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use skr_core::config::{self, find_agent_skills_dir, global_install_root, project_root_for};
use skr_runtime::oci::credentials::ChainProvider;
use skr_runtime::{Installer, MutableTags, RegistryClient, Store};

/// skr: package manager for agent skills.
#[derive(Parser)]
#[command(name = "skr", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Clone, Debug, Default)]
pub struct GlobalArgs {
    /// Local artifact store directory
    #[arg(long, global = true, env = "SKR_STORE")]
    pub store: Option<PathBuf>,

    /// Tags that are re-pulled on every install (comma separated)
    #[arg(long, global = true, env = "SKR_MUTABLE_TAGS", value_delimiter = ',')]
    pub mutable_tags: Vec<String>,

    /// Registries reached over plain HTTP (comma separated)
    #[arg(long, global = true, env = "SKR_INSECURE_REGISTRIES", value_delimiter = ',')]
    pub insecure_registries: Vec<String>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Initialize a project with .skr.yaml and .agent/skills
    Init(init::InitArgs),
    /// Build a skill directory into a local artifact
    Build(build::BuildArgs),
    /// Create a tag that refers to an existing artifact
    Tag(tag::TagArgs),
    /// Remove tags from the local store
    Untag(untag::UntagArgs),
    /// Push a local artifact to its registry
    Push(push::PushArgs),
    /// Pull an artifact from a registry into the local store
    Pull(pull::PullArgs),
    /// Build a skill and push it in one step
    Publish(publish::PublishArgs),
    /// Install a skill and its dependencies
    Install(install::InstallArgs),
    /// Install every skill listed in .skr.yaml
    Sync(sync::SyncArgs),
    /// Remove an installed skill
    Rm(rm::RmArgs),
    /// List installed skills
    List(list::ListArgs),
    /// Show the manifest, config and layers of an artifact
    Inspect(inspect::InspectArgs),
    /// Manage the local store
    System(system::SystemArgs),
    /// Manage registry credentials
    Registry(registry::RegistryArgs),
    /// Serve the local store (or proxy a registry) over the OCI distribution API
    Serve(serve::ServeArgs),
}

impl GlobalArgs {
    fn store_dir(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(config::default_store_dir)
    }

    /// Open (creating if needed) the local store.
    pub(crate) async fn open_store(&self) -> Result<Arc<Store>, Box<dyn std::error::Error>> {
        let store = Store::open(&self.store_dir()).await?;
        Ok(Arc::new(store))
    }

    /// Registry client bound to `store` with the default credential chain.
    pub(crate) fn registry_client(&self, store: Arc<Store>) -> RegistryClient {
        RegistryClient::new(store, Arc::new(ChainProvider::default_chain()))
            .with_insecure_registries(self.insecure_registries.clone())
    }

    /// Installer that pulls missing or mutable references from registries.
    pub(crate) fn installer(&self, store: Arc<Store>) -> Installer {
        let client = Arc::new(self.registry_client(store.clone()));
        let policy = if self.mutable_tags.is_empty() {
            MutableTags::default()
        } else {
            MutableTags::new(self.mutable_tags.iter().cloned())
        };
        Installer::new(store)
            .with_puller(client)
            .with_policy(Arc::new(policy))
    }
}

/// Where skills are installed and where `.skr.yaml` lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstallTarget {
    pub install_root: PathBuf,
    pub config_dir: PathBuf,
}

impl InstallTarget {
    /// Global target: `~/.config/agent/skills` with its config in skr's config dir.
    pub(crate) fn global() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            install_root: global_install_root()?,
            config_dir: config::config_dir(),
        })
    }

    /// Project target: the nearest `.agent/skills` above `cwd`, or a new one in `cwd`.
    pub(crate) fn project(cwd: &Path) -> Self {
        match find_agent_skills_dir(cwd) {
            Some(install_root) => {
                let config_dir = project_root_for(&install_root).unwrap_or_else(|| cwd.to_path_buf());
                Self {
                    install_root,
                    config_dir,
                }
            }
            None => Self {
                install_root: cwd.join(".agent").join("skills"),
                config_dir: cwd.to_path_buf(),
            },
        }
    }

    pub(crate) fn resolve(global: bool) -> Result<Self, Box<dyn std::error::Error>> {
        if global {
            Self::global()
        } else {
            Ok(Self::project(&std::env::current_dir()?))
        }
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Every command except `serve` is raced against Ctrl-C; `serve` shuts
/// down gracefully on its own.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Cli { global, command } = cli;

    if let Command::Serve(args) = command {
        return serve::execute(args, &global).await;
    }

    tokio::select! {
        result = run(command, &global) => result,
        _ = tokio::signal::ctrl_c() => Err("Interrupted".into()),
    }
}

async fn run(command: Command, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init(args) => init::execute(args).await,
        Command::Build(args) => build::execute(args, global).await,
        Command::Tag(args) => tag::execute(args, global).await,
        Command::Untag(args) => untag::execute(args, global).await,
        Command::Push(args) => push::execute(args, global).await,
        Command::Pull(args) => pull::execute(args, global).await,
        Command::Publish(args) => publish::execute(args, global).await,
        Command::Install(args) => install::execute(args, global).await,
        Command::Sync(args) => sync::execute(args, global).await,
        Command::Rm(args) => rm::execute(args, global).await,
        Command::List(args) => list::execute(args).await,
        Command::Inspect(args) => inspect::execute(args, global).await,
        Command::System(args) => system::execute(args, global).await,
        Command::Registry(args) => registry::execute(args).await,
        Command::Serve(args) => serve::execute(args, global).await,
    }
}
