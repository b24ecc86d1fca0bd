//! pdfhost worker binary.
//!
//! Runs one engine instance for a process-mode pool. Frames travel on stdin
//! and stdout; logs go to stderr.

use clap::{Parser, ValueEnum};
use pdfhost_engine::MemoryEngine;
use tracing_subscriber::EnvFilter;

/// Engines this binary can host.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Engine {
	/// Reference engine reading fixture documents.
	#[default]
	Memory,
}

/// Worker command line arguments.
#[derive(Parser, Debug)]
#[command(name = "pdfhost-worker")]
#[command(about = "Process-isolated PDF engine instance speaking pdfhost frames on stdio")]
struct Args {
	/// Engine to host
	#[arg(long, value_enum, default_value_t = Engine::Memory)]
	engine: Engine,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let default_level = if args.verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_env("PDFHOST_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	tracing::debug!(engine = ?args.engine, "worker.starting");
	match args.engine {
		Engine::Memory => pdfhost::worker::run_worker(MemoryEngine::new).await?,
	}
	Ok(())
}
