//! `trawl`: capture messages, index them, search and read them back.

mod commands;
mod error;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use exn::ResultExt;
use tracing_subscriber::EnvFilter;
use trawl_config::Config;

use crate::commands::MessageSource;
use crate::error::{ErrorKind, Result};

#[derive(Parser)]
#[command(name = "trawl", version)]
#[command(about = "Capture, archive and search web messages")]
struct Cli {
    /// Config file (TOML, YAML or JSON). `TRAWL_*` variables override it.
    #[arg(short, long, global = true, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record files as captured messages and index them
    Capture {
        /// Files to capture; `-` reads a list of paths from stdin
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Files already start with a `key: value` header block
        #[arg(long)]
        raw: bool,
        /// Source URI to record instead of the file's own
        #[arg(long)]
        uri: Option<String>,
        /// Content type header to record
        #[arg(long)]
        content_type: Option<String>,
        /// Only queue the messages; index them later with `drain`
        #[arg(long)]
        queue_only: bool,
    },
    /// Index every message waiting in the queue
    Drain,
    /// Search indexed documents
    Search {
        query: String,
        /// Offset of the first result
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
    },
    /// Print an archived document exactly as it was captured
    Show { id: u64 },
    /// Summarize the queue, archive and index
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(tracing::Level::INFO.into()).from_env_lossy())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Capture {
            files,
            raw,
            uri,
            content_type,
            queue_only,
        } => {
            let files = if files.len() == 1 && files[0].as_os_str() == "-" {
                commands::read_file_list(io::stdin().lock())?
            } else {
                files
            };
            let source = MessageSource { raw, uri, content_type };
            commands::capture(config, &files, &source, queue_only)
        },
        Command::Drain => commands::drain(&config),
        Command::Search {
            query,
            start,
            page_size,
        } => commands::search(&config, &query, start, page_size),
        Command::Show { id } => commands::show(&config, id),
        Command::Status => commands::status(&config),
    }
}
