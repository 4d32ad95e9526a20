//! CLI for batchdl.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use batchdl_core::config;
use batchdl_core::persistence::SqliteStore;
use batchdl_core::BatchState;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{run_add, run_delete, run_manager, run_pause, run_resume, run_status};

/// Top-level CLI for batchdl.
#[derive(Debug, Parser)]
#[command(name = "batchdl")]
#[command(about = "batchdl: persistent, resumable batch downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Record a new batch. Nothing is downloaded until `batchdl run`.
    Add {
        /// Batch title.
        title: String,

        /// One or more HTTP/HTTPS URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Storage root for the batch (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Batch identifier (a UUID is generated when absent).
        #[arg(long)]
        id: Option<String>,
    },

    /// Download every queued batch, then exit.
    Run {
        /// Download the files of a batch in parallel.
        #[arg(long)]
        concurrent: bool,
        /// Parallel files per batch with --concurrent (default from config).
        #[arg(long, value_name = "N")]
        files: Option<usize>,
    },

    /// Show status of all batches.
    Status {
        /// Also list every file.
        #[arg(long)]
        files: bool,
        /// Only batches stored in this state (queued, downloading, paused,
        /// downloaded, deleting, error).
        #[arg(long, value_name = "STATE", value_parser = parse_state)]
        state: Option<BatchState>,
    },

    /// Pause a batch by its ID.
    Pause {
        /// Batch identifier.
        id: String,
    },

    /// Resume a paused batch by its ID.
    Resume {
        /// Batch identifier.
        id: String,
    },

    /// Delete a batch and its downloaded data.
    Delete {
        /// Batch identifier.
        id: String,
        /// Forget the batch but leave downloaded files on disk.
        #[arg(long)]
        keep_files: bool,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = Arc::new(SqliteStore::open_default().await?);

        match cli.command {
            CliCommand::Add {
                title,
                urls,
                dir,
                id,
            } => {
                let dir = match dir {
                    Some(d) => d,
                    None => std::env::current_dir()?,
                };
                run_add(&*store, &title, &dir, &urls, id).await?;
            }
            CliCommand::Run { concurrent, files } => {
                cfg.concurrent_file_downloading |= concurrent;
                if let Some(n) = files {
                    cfg.max_parallel_files = n;
                }
                run_manager(store, &cfg).await?;
            }
            CliCommand::Status { files, state } => run_status(&*store, files, state).await?,
            CliCommand::Pause { id } => run_pause(&*store, &id.into()).await?,
            CliCommand::Resume { id } => run_resume(&*store, &id.into()).await?,
            CliCommand::Delete { id, keep_files } => {
                run_delete(store, &cfg, &id.into(), !keep_files).await?;
            }
        }

        Ok(())
    }
}

fn parse_state(s: &str) -> Result<BatchState, String> {
    let state = BatchState::parse(s);
    if state.as_str() == s {
        Ok(state)
    } else {
        Err(format!("unknown batch state '{s}'"))
    }
}

#[cfg(test)]
mod tests;
