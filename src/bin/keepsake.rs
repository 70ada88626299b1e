//! keepsake: inspect and maintain a file-backed state directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keepsake::{FileStorage, KeepsakeConfig, SetOptions, StateStore};

/// Keepsake state CLI
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(version)]
#[command(about = "Inspect and maintain keepsake durable state")]
struct Args {
    /// Config file (default: ~/.keepsake/config.toml)
    #[arg(short, long, env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// State file (overrides [state] storage_dir)
    #[arg(short, long, env = "KEEPSAKE_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List live keys
    List {
        /// Only keys starting with this prefix
        prefix: Option<String>,
    },

    /// Print the value stored under a key
    Get { key: String },

    /// Store a JSON value durably
    Set {
        key: String,
        /// Value as JSON (e.g. '{"theme":"dark"}')
        value: String,
        /// Owner identity recorded with the entry
        #[arg(short, long)]
        user: Option<String>,
        /// Expire after this many seconds
        #[arg(long)]
        expires_in: Option<u64>,
    },

    /// Remove a key
    Remove { key: String },

    /// Remove every expired entry
    Purge,

    /// Print the full entry (value plus metadata) as JSON
    Export { key: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = KeepsakeConfig::load(args.config.as_deref())?;
    let path = match args.state {
        Some(path) => path,
        None => config.storage_path()?,
    };
    let storage = FileStorage::open(&path).await?;
    let store = StateStore::builder()
        .storage(Arc::new(storage))
        .namespace(config.state.namespace.clone())
        .build();

    match args.command {
        Command::List { prefix } => {
            let keys = store.keys(prefix.as_deref()).await?;
            if keys.is_empty() {
                println!("no keys");
            }
            for key in keys {
                println!("{key}");
            }
        }

        Command::Get { key } => match store.get_state(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => {
                eprintln!("'{key}' not found");
                std::process::exit(1);
            }
        },

        Command::Set {
            key,
            value,
            user,
            expires_in,
        } => {
            let value: serde_json::Value = serde_json::from_str(&value)?;
            let mut options = SetOptions::new().persistent(true);
            if let Some(user) = user {
                options = options.user(user);
            }
            if let Some(secs) = expires_in {
                let delta = chrono::Duration::from_std(Duration::from_secs(secs))?;
                let at = chrono::Utc::now()
                    .checked_add_signed(delta)
                    .ok_or("expiry out of range")?;
                options = options.expires_at(Some(at));
            }
            let entry = store.set_state(&key, value, options).await?;
            println!("saved '{key}' at {}", entry.saved_at);
        }

        Command::Remove { key } => {
            store.remove_state(&key, None).await?;
            println!("removed '{key}'");
        }

        Command::Purge => {
            let purged = store.purge_expired().await?;
            println!("purged {purged} expired entries");
        }

        Command::Export { key } => match store.get_entry(&key).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => {
                eprintln!("'{key}' not found");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
