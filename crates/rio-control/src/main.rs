//! rioctl - apply a declarative state file to the platform.
//!
//! This is the entry point for the `rioctl` binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rio_auth::{PlatformConfig, ReqwestTransport, Session};
use rio_control::{load_state, HttpPlatformClient, PollConfig, ReconcileOptions, Reconciler};
use rio_store::{MemoryStore, RocksStore, Store};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rioctl - declarative management of platform packages, networks and deployments.
#[derive(Parser, Debug)]
#[command(name = "rioctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Platform configuration file (JSON). Without it, `RIO_*` variables are used.
    #[arg(long, env = "RIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile every entry of a state file.
    Apply {
        /// State file (`.json`, `.yaml` or `.yml`).
        state_file: PathBuf,

        /// Report what would change without changing anything.
        #[arg(long)]
        dry_run: bool,

        /// Omit diffs from the printed outcomes.
        #[arg(long)]
        hide_changes: bool,
    },
}

fn open_store(config: &PlatformConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.data_dir {
        Some(dir) => {
            let store = RocksStore::open(dir)
                .with_context(|| format!("opening credential store at {}", dir.display()))?;
            tracing::info!(data_dir = %dir.display(), "Initialized RocksDB store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::debug!("No data dir configured, credentials are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Outcomes go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rio=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => PlatformConfig::from_file(path)?,
        None => PlatformConfig::from_env()?,
    };

    let Command::Apply {
        state_file,
        dry_run,
        hide_changes,
    } = args.command;

    let entries = load_state(&state_file)?;

    let session = Session::new(
        Arc::new(ReqwestTransport::new(config.request_timeout())),
        open_store(&config)?,
        Arc::new(config.clone()),
        &config.session_settings(),
    );
    let platform = HttpPlatformClient::new(Arc::new(session), &config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling provisioning waits");
            on_interrupt.cancel();
        }
    });

    let reconciler = Reconciler::new(Arc::new(platform))
        .with_poll(PollConfig::from_platform(&config))
        .with_cancellation(cancel);
    let options = ReconcileOptions {
        dry_run,
        show_changes: !hide_changes,
    };

    tracing::info!(
        state_file = %state_file.display(),
        entries = entries.len(),
        dry_run,
        "Applying state"
    );

    let mut outcomes = Vec::with_capacity(entries.len());
    for entry in &entries {
        let outcome = reconciler
            .apply(entry, options)
            .await
            .with_context(|| format!("reconciling '{}'", entry.name()))?;
        outcomes.push(outcome);
    }

    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} entries failed to reconcile", outcomes.len());
    }
    Ok(())
}
