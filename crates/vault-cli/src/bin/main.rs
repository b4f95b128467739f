//! byok-vault - manage your own AI provider API keys from the terminal
//!
//! Keys are encrypted with a key derived from your passphrase and stored in
//! the user data directory. The passphrase is read from
//! `BYOK_VAULT_PASSPHRASE` or prompted for, and never stored.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use vault_cli::{run, Command};
use vault_core::{SecretString, Vault};

/// BYOK Vault - encrypted storage for your AI provider API keys
#[derive(Parser, Debug)]
#[command(name = "byok-vault")]
#[command(version)]
#[command(about = "Encrypted storage for your own AI provider API keys")]
struct Args {
    /// Vault directory (defaults to the user data directory)
    #[arg(long, env = "BYOK_VAULT_DIR")]
    data_dir: Option<PathBuf>,

    /// Vault passphrase
    #[arg(long, env = "BYOK_VAULT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn prompt_secret(prompt: &str) -> std::io::Result<SecretString> {
    rpassword::prompt_password(prompt).map(SecretString::new)
}

async fn execute(args: Args) -> Result<String, Box<dyn std::error::Error>> {
    let Args {
        data_dir,
        passphrase,
        mut command,
    } = args;

    if let Some((slot, prompt)) = command.missing_secret() {
        let value = prompt_secret(prompt)?;
        *slot = Some(value.expose().to_string());
    }

    let passphrase = match passphrase {
        Some(p) => Some(SecretString::new(p)),
        None if command.needs_passphrase() => Some(prompt_secret("Vault passphrase: ")?),
        None => None,
    };

    let mut vault = match data_dir {
        Some(dir) => Vault::open_at(dir),
        None => Vault::open(),
    }
    .map_err(|e| format!("Failed to open vault: {}", e))?;

    Ok(run(&mut vault, command, passphrase).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match execute(args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
