//! node-mark: mark a node online or offline in the resource manager,
//! touching only the offline state this system owns.
//!
//! ## Subcommands
//!
//! - `online [HOST]`: bring the node back if our note put it offline
//! - `offline HOST NOTE...`: take the node offline with our note

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nhcwatch_core::config::Config;
use nhcwatch_core::notify::{local_hostname, Notifier};
use nhcwatch_core::rm::{adapter_for, Reconciler, ResourceManager, SystemRunner};
use nhcwatch_core::{logging, NhcError, Result};

#[derive(Parser)]
#[command(name = "node-mark")]
#[command(about = "Mark nodes online/offline in the resource manager")]
#[command(version)]
struct Cli {
    /// Resource manager (pbs, slurm, lsf, sge); detected from PATH if unset
    #[arg(long, global = true, value_name = "RM")]
    rm: Option<String>,

    /// Online nodes that are offline with no note at all
    #[arg(long, global = true)]
    ignore_empty_note: bool,

    /// Configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring a node back online if it is offline for our reason
    Online {
        /// Node name (default: this host)
        #[arg(value_name = "HOST")]
        host: Option<String>,
    },

    /// Take a node offline with a note
    Offline {
        /// Node name
        #[arg(value_name = "HOST")]
        host: String,

        /// Reason stored after the leader tag
        #[arg(value_name = "NOTE", num_args = 0..)]
        note: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            logging::init(&Default::default());
            tracing::error!(error = %err, "node-mark configuration failed");
            std::process::exit(err.exit_code());
        }
    };
    let _logging_guard = logging::init(&config.logging);

    if cli.rm.is_some() {
        config.rm.manager = cli.rm.clone();
    }
    if cli.ignore_empty_note {
        config.rm.ignore_empty_note = true;
    }

    let code = match run(cli.command, &config) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "node-mark failed");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn reconciler(config: &Config) -> Result<Reconciler> {
    let kind = ResourceManager::resolve(config.rm.manager.as_deref(), std::env::var_os("PATH"))?;
    let adapter = adapter_for(kind, &config.rm.commands, Box::new(SystemRunner));
    let notifier = Notifier::from_config(&config.notify)?;
    Ok(Reconciler::new(adapter, &config.rm).with_notifier(notifier, config.notify.notify_foreign))
}

fn run(command: Commands, config: &Config) -> Result<i32> {
    let reconciler = reconciler(config)?;
    match command {
        Commands::Online { host } => {
            let host = host.unwrap_or_else(local_hostname);
            let result = reconciler.mark_online(&host)?;
            tracing::debug!(host = %result.host, decision = ?result.decision, "Online reconciliation done");
            Ok(result.exit_code())
        }
        Commands::Offline { host, note } => {
            if host.trim().is_empty() {
                return Err(NhcError::InvalidArgument("host name is empty".to_string()));
            }
            let outcome = reconciler.mark_offline(&host, &note.join(" "))?;
            tracing::debug!(host = %outcome.host, action = ?outcome.action, "Offline reconciliation done");
            Ok(outcome.exit_code())
        }
    }
}
