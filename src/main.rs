//! cladebatch - bounded-concurrency Nextclade batch runner
//!
//! Runs the analysis tool once per pre-split chunk, at most K at a time,
//! then merges the per-chunk outputs into one artifact per kind.
//!
//! Exit codes:
//!   0 - Success, or no chunks to process
//!   1 - Configuration or runtime error
//!   2 - One or more chunks failed
//!   3 - Outputs missing or merge failed
//!   4 - Required binary not found

mod aggregate;
mod chunks;
mod cli;
mod config;
mod error;
mod handoff;
mod models;
mod pipeline;
mod report;
mod scheduler;
mod worker;

use anyhow::{Context, Result};
use chunks::{ChunkConfig, ChunkSet};
use cli::Args;
use config::{Config, CONFIG_FILE_NAME};
use handoff::{Publisher, UploadCommand};
use pipeline::{Pipeline, PipelineOutcome, PipelineSettings};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use worker::NextcladeRunner;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("cladebatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_batch(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Batch failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .cladebatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the dataset, budget, and summary/upload commands.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the whole batch. Returns the process exit code.
async fn run_batch(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return Ok(e.exit_code());
    }

    let budget = config.budget()?;
    let chunk_config = ChunkConfig {
        chunks_dir: config.chunks_dir()?.to_path_buf(),
        extension: config.general.chunk_extension.clone(),
        work_dir: config.general.work_dir.clone(),
    };

    if args.dry_run {
        return handle_dry_run(&chunk_config, &config);
    }

    println!("🧬 Running {} over {}", config.tool.binary, chunk_config.chunks_dir.display());
    println!("   Dataset: {}", config.tool.dataset.display());
    println!(
        "   Budget: {} processor(s), {} thread(s) per worker, {} worker(s) at once",
        budget.processors,
        budget.threads_per_worker,
        budget.concurrency_slots()
    );
    if let Some(timeout) = config.worker_timeout() {
        println!("   Worker timeout: {}s", timeout.as_secs());
    }

    let runner = NextcladeRunner::new(config.tool_invocation())
        .with_summary(config.summary_command())
        .with_timeout(config.worker_timeout());

    let publisher: Option<Box<dyn Publisher>> =
        config.upload_target().map(|(command, destination)| {
            Box::new(UploadCommand {
                program: PathBuf::from(command),
                args: config.upload.args.clone(),
                destination: destination.to_string(),
            }) as Box<dyn Publisher>
        });

    let settings = PipelineSettings {
        chunks: chunk_config,
        output_dir: config.general.output_dir.clone(),
        budget,
        kinds: config.output_kinds(),
        required_binaries: config.required_binaries(),
        show_progress: !args.quiet,
    };

    let run = Pipeline::new(settings, runner)
        .with_publisher(publisher)
        .run()
        .await;

    if let Some(ref path) = config.general.report {
        match report::write_report(&run.report, path) {
            Ok(()) => info!("Run report written to {}", path.display()),
            Err(e) => warn!("{:#}", e),
        }
    }

    match &run.result {
        Ok(PipelineOutcome::NothingToDo) => {
            println!("\n✅ No chunks to process. Nothing to do.");
        }
        Ok(PipelineOutcome::Completed { .. }) => {
            report::print_summary(&run.report);
            println!("\n✅ Batch complete!");
        }
        Err(e) => {
            report::print_summary(&run.report);
            error!("{}", e);
            eprintln!("\n❌ Error: {}", e);
        }
    }

    Ok(run.exit_code())
}

/// Handle --dry-run: list chunks and the worker budget, exit.
fn handle_dry_run(chunk_config: &ChunkConfig, config: &Config) -> Result<i32> {
    println!("\n🔍 Dry run: listing chunks (nothing is launched)...\n");

    let chunks = ChunkSet::discover(chunk_config)?;
    let budget = config.budget()?;

    if chunks.is_empty() {
        println!("   No .{} chunks found.", chunk_config.extension);
    } else {
        println!("   Found {} chunk(s):\n", chunks.len());
        for chunk in chunks.iter() {
            println!("     📄 {} ({})", chunk.name, chunk.input.display());
        }
    }

    println!(
        "\n   Workers: {} at once, {} thread(s) each",
        budget.concurrency_slots(),
        budget.threads_per_worker
    );
    println!("   Outputs: {}", config.general.output_dir.display());
    println!("\n✅ Dry run complete.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
