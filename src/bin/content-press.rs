//! content-press batch runner
//!
//! Usage:
//!   content-press --config content-press.json --templates templates.json
//!   content-press --config content-press.json --templates templates.json \
//!     --only spring-menu --only harvest-notes --mode replace --dry-run
//!
//! Exit codes: 0 when every record published, 1 when any record was skipped,
//! failed or not started, 2 when setup failed before the batch began.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use content_press::{Config, Pipeline, PublishMode, TemplateRegistry, run_with_shutdown};

/// Generate, assemble and publish templated content records
#[derive(Parser, Debug)]
#[command(name = "content-press")]
#[command(about = "Idempotent asset generation and publishing for content templates")]
struct Args {
    /// Pipeline configuration (JSON)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Template definitions (JSON array)
    #[arg(long, short = 't')]
    templates: PathBuf,

    /// Publish mode, overrides the configured one
    #[arg(long, short = 'm')]
    mode: Option<PublishMode>,

    /// Only process these slugs (can be specified multiple times)
    #[arg(long)]
    only: Vec<String>,

    /// Generate and validate but do not write to the content store
    #[arg(long, short = 'n')]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Setup failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> content_press::Result<bool> {
    let mut config = Config::from_json_file(&args.config)?;
    if let Some(mode) = args.mode {
        config.publish.mode = mode;
    }
    if args.dry_run {
        config.publish.dry_run = true;
    }

    let mut registry = TemplateRegistry::from_json_file(&args.templates)?;
    if !args.only.is_empty() {
        registry.retain_slugs(&args.only)?;
    }

    tracing::info!(
        templates = registry.len(),
        mode = %config.publish.mode,
        dry_run = config.publish.dry_run,
        "Starting content-press"
    );

    let pipeline = Pipeline::new(config).await?;
    let summary = run_with_shutdown(&pipeline, &registry).await;

    println!("{summary}");
    Ok(summary.all_published())
}
