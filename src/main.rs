//! blobkit command line client

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blobkit::config::{AppConfig, LogFormat};
use blobkit::storage::create_storage;
use blobkit::{BlobStorage, ListOptions};

/// Browse and edit blob storage
#[derive(Parser, Debug)]
#[command(name = "blobkit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file, overrides BLOBKIT_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Descend into sub-folders
        #[arg(short, long)]
        recurse: bool,
        /// Only entries whose name starts with this
        #[arg(long)]
        prefix: Option<String>,
        /// Stop after this many entries
        #[arg(long)]
        max: Option<usize>,
        /// Fetch size, timestamps and hashes for files
        #[arg(long)]
        attributes: bool,
        /// Print JSON instead of one path per line
        #[arg(long)]
        json: bool,
    },

    /// Print a file to stdout
    Cat { path: String },

    /// Upload a file, or stdin when no file is given
    Put {
        path: String,
        file: Option<PathBuf>,
        #[arg(long)]
        append: bool,
    },

    /// Delete files or folders
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Report whether paths exist
    Exists {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Print blob attributes as JSON
    Stat {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config)?;

    let storage_config = config
        .storage_config()
        .context("invalid storage configuration")?;
    let adapter = create_storage(storage_config).await?;
    let storage = BlobStorage::new(adapter).with_attribute_batch_size(config.attribute_batch_size()?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    run(cli.command, &storage, &cancel).await
}

async fn run(command: Command, storage: &BlobStorage, cancel: &CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::Ls {
            path,
            recurse,
            prefix,
            max,
            attributes,
            json,
        } => {
            let mut options = ListOptions::new()
                .folder(path)
                .recurse(recurse)
                .include_attributes(attributes);
            if let Some(prefix) = prefix {
                options = options.prefix(prefix);
            }
            if let Some(max) = max {
                options = options.max_results(max);
            }

            let blobs = storage.list(options, cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&blobs)?);
            } else {
                for blob in &blobs {
                    println!("{}", blob);
                }
            }
        }
        Command::Cat { path } => {
            let Some(data) = storage.read_bytes(&path, cancel).await? else {
                bail!("{} does not exist", path);
            };
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Command::Put { path, file, append } => {
            let data = match file {
                Some(file) => tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?,
                None => {
                    let mut buffer = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buffer).await?;
                    buffer
                }
            };
            let len = data.len();
            storage.write_bytes(&path, data, append, cancel).await?;
            tracing::info!(%path, len, append, "uploaded");
        }
        Command::Rm { paths } => {
            storage.delete(&paths, cancel).await?;
        }
        Command::Exists { paths } => {
            let found = storage.exists(&paths, cancel).await?;
            for (path, exists) in paths.iter().zip(found) {
                println!("{}\t{}", path, exists);
            }
        }
        Command::Stat { paths } => {
            let blobs = storage.get_blobs(&paths, cancel).await?;
            println!("{}", serde_json::to_string_pretty(&blobs)?);
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("blobkit=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries command output
    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
