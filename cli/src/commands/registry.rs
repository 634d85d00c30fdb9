//! `skr registry` commands.

use std::io::BufRead;

use clap::{Args, Subcommand};
use skr_runtime::oci::credentials::{self, normalize_registry, CredentialStore, KeyringProvider, LoginBackend};

#[derive(Args)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommand,
}

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// Store credentials for a registry
    Login(LoginArgs),
    /// Remove stored credentials for a registry
    Logout(LogoutArgs),
}

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (e.g. ghcr.io)
    pub server: String,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password or token
    #[arg(short, long, conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read the password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

#[derive(Args)]
pub struct LogoutArgs {
    /// Registry server
    pub server: String,
}

pub async fn execute(args: RegistryArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        RegistryCommand::Login(login) => execute_login(login),
        RegistryCommand::Logout(logout) => {
            let server = normalize_registry(&logout.server);
            let removed = credentials::logout(
                &KeyringProvider::new(),
                &CredentialStore::default_path(),
                &server,
            )?;
            if removed {
                println!("Removed login credentials for {server}");
            } else {
                println!("Not logged in to {server}");
            }
            Ok(())
        }
    }
}

fn execute_login(args: LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = normalize_registry(&args.server);

    let username = match args.username {
        Some(u) => u,
        None => prompt("Username: ")?,
    };

    let password = if args.password_stdin {
        read_line()?
    } else {
        match args.password {
            Some(p) => p,
            None => prompt("Password: ")?,
        }
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    let backend = credentials::login(
        &KeyringProvider::new(),
        &CredentialStore::default_path(),
        &server,
        &username,
        &password,
    )?;
    match backend {
        LoginBackend::Keyring => println!("Login Succeeded (stored in system keyring)"),
        LoginBackend::File => println!(
            "Login Succeeded (stored in {})",
            CredentialStore::default_path().path().display()
        ),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String, Box<dyn std::error::Error>> {
    eprint!("{label}");
    read_line()
}

fn read_line() -> Result<String, Box<dyn std::error::Error>> {
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
