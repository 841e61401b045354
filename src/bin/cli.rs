// src/bin/cli.rs
//
//! Operator CLI over the storage object lifecycle.
//!
//! Examples:
//! ```bash
//! azstore-cli exists    az://myacct/data/dir/file.txt
//! azstore-cli stat      az://myacct/data/dir/file.txt
//! azstore-cli put       ./file.txt az://myacct/data/dir/file.txt
//! azstore-cli get       az://myacct/data/dir/file.txt ./file.txt
//! azstore-cli ls        az://myacct/data/dir/            # candidates, relative keys
//! azstore-cli ls        'az://myacct/data/res/{sample}.csv'
//! azstore-cli tree      az://myacct/data/dir/            # immediate children
//! azstore-cli touch     az://myacct/data/dir/file.txt
//! azstore-cli rm        az://myacct/data/dir/file.txt
//! azstore-cli validate  az://myacct/data/dir/file.txt
//! azstore-cli inventory az://myacct/data
//!
//! # Account supplied separately
//! AZSTORE_ACCOUNT_NAME=myacct azstore-cli stat az://data/dir/file.txt
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use futures::StreamExt;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use azstore::{example_queries, validate_query, AzureSession, StorageObject, StorageSettings};

/// Print to stdout, exiting quietly when the pipe closes (e.g. `| head`).
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => std::process::exit(0),
            Err(e) => return Err(e.into()),
        }
    };
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(
        short = 'v',
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity: -v = Info, -vv = Debug"
    )]
    verbose: u8,

    #[command(flatten)]
    conn: ConnectionArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Storage account, when the query does not name it
    #[arg(long, env = "AZSTORE_ACCOUNT_NAME", global = true)]
    account_name: Option<String>,

    /// Blob endpoint override (emulator or custom endpoint)
    #[arg(long, env = "AZSTORE_ENDPOINT_URL", global = true)]
    endpoint_url: Option<String>,

    #[arg(long, env = "AZSTORE_CONNECTION_STRING", hide_env_values = true, global = true)]
    connection_string: Option<String>,

    #[arg(long, env = "AZSTORE_ACCOUNT_KEY", hide_env_values = true, global = true)]
    account_key: Option<String>,

    #[arg(long, env = "AZSTORE_SAS_TOKEN", hide_env_values = true, global = true)]
    sas_token: Option<String>,

    /// Client id of a user-assigned managed identity
    #[arg(long, env = "AZSTORE_MANAGED_IDENTITY_CLIENT_ID", global = true)]
    managed_identity_client_id: Option<String>,

    /// Never create missing containers on put
    #[arg(long, env = "AZSTORE_NO_CREATE_CONTAINER", global = true)]
    no_create_container: bool,

    /// Transfer chunk size in bytes
    #[arg(long, env = "AZSTORE_CHUNK_SIZE", global = true)]
    chunk_size: Option<usize>,

    /// Abort transfers after this many seconds
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,
}

impl ConnectionArgs {
    fn settings(&self) -> StorageSettings {
        let mut s = StorageSettings::new().with_create_container(!self.no_create_container);
        if let Some(v) = &self.account_name {
            s = s.with_account_name(v);
        }
        if let Some(v) = &self.endpoint_url {
            s = s.with_endpoint_url(v);
        }
        if let Some(v) = &self.connection_string {
            s = s.with_connection_string(v);
        }
        if let Some(v) = &self.account_key {
            s = s.with_account_key(v);
        }
        if let Some(v) = &self.sas_token {
            s = s.with_sas_token(v);
        }
        if let Some(v) = &self.managed_identity_client_id {
            s = s.with_managed_identity_client_id(v);
        }
        if let Some(v) = self.chunk_size {
            s = s.with_chunk_size(v);
        }
        s
    }
}

#[derive(Subcommand)]
enum Command {
    /// Exit 0 if the object exists, 1 otherwise
    Exists { query: String },

    /// Show size, etag and last-modified of one object
    Stat { query: String },

    /// Download one object to a local file
    Get {
        query: String,
        /// Destination; defaults to <container>/<key> under the current directory
        dest: Option<PathBuf>,
    },

    /// Upload a local file, overwriting the object
    Put { src: PathBuf, query: String },

    /// Delete one object (absent objects are fine)
    Rm { query: String },

    /// List keys below a prefix or matching a glob, relative to it
    Ls { query: String },

    /// Immediate children of a prefix, directories marked with '/'
    Tree { query: String },

    /// Advance last-modified by re-uploading the content
    Touch { query: String },

    /// Check query syntax and naming rules without contacting the service
    Validate { queries: Vec<String> },

    /// Every blob of the container named by the query
    Inventory { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::Validate { queries } = &cli.cmd {
        return validate_cmd(queries);
    }

    let session = AzureSession::new(cli.conn.settings()).context("invalid storage settings")?;
    let cancel = CancellationToken::new();
    if let Some(secs) = cli.conn.deadline_secs {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("deadline of {}s reached, cancelling", secs);
            token.cancel();
        });
    }
    let open = |query: &str| -> Result<StorageObject> {
        Ok(session
            .object(query)
            .with_context(|| format!("cannot resolve '{}'", query))?
            .with_cancellation(cancel.clone()))
    };

    match cli.cmd {
        Command::Exists { query } => {
            let exists = open(&query)?.exists().await?;
            safe_println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Command::Stat { query } => {
            let obj = open(&query)?;
            let Some(h) = obj.stat().await? else {
                bail!("{} does not exist", obj.query());
            };
            safe_println!("key:           {}", h.key);
            safe_println!("size:          {}", h.size);
            safe_println!("etag:          {}", h.etag.as_deref().unwrap_or("-"));
            safe_println!("last-modified: {}", h.last_modified.to_rfc3339());
        }
        Command::Get { query, dest } => {
            let obj = open(&query)?;
            let dest = dest.unwrap_or_else(|| PathBuf::from(obj.local_suffix()));
            let n = obj.retrieve_to_path(&dest).await?;
            info!("wrote {} bytes to {}", n, dest.display());
        }
        Command::Put { src, query } => {
            let obj = open(&query)?;
            let n = obj
                .store_from_path(&src)
                .await
                .with_context(|| format!("upload of {} failed", src.display()))?;
            info!("stored {} bytes to {}", n, obj.query());
        }
        Command::Rm { query } => open(&query)?.remove().await?,
        Command::Ls { query } => {
            let mut candidates = open(&query)?.list_candidates();
            while let Some(key) = candidates.next().await {
                safe_println!("{}", key?);
            }
        }
        Command::Tree { query } => {
            for entry in open(&query)?.list_directory().await? {
                let marker = if entry.is_directory { "/" } else { "" };
                safe_println!("{}{}", entry.relative_key, marker);
            }
        }
        Command::Touch { query } => {
            let mtime = open(&query)?.touch().await?;
            safe_println!("{}", mtime.to_rfc3339());
        }
        Command::Inventory { query } => {
            let inv = open(&query)?.inventory().await?;
            if !inv.container_exists {
                warn!("container for '{}' does not exist", query);
            }
            for (key, h) in inv.blobs {
                safe_println!("{}\t{}\t{}", h.size, h.last_modified.to_rfc3339(), key);
            }
        }
        Command::Validate { queries } => validate_cmd(&queries)?,
    }
    Ok(())
}

fn validate_cmd(queries: &[String]) -> Result<()> {
    if queries.is_empty() {
        for ex in example_queries() {
            safe_println!("{}\n    {}", ex.query, ex.description);
        }
        return Ok(());
    }
    let mut all_valid = true;
    for q in queries {
        let v = validate_query(q);
        match &v.reason {
            None => safe_println!("ok       {}", v.query),
            Some(reason) => safe_println!("invalid  {}: {}", v.query, reason),
        }
        all_valid &= v.valid;
    }
    if !all_valid {
        bail!("one or more queries are invalid");
    }
    Ok(())
}
