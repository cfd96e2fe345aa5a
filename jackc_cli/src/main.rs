//! jackc: compile Jack classes to stack VM code, one `.vm` file per class.
//!
//! Logging is controlled through `RUST_LOG`, for example
//! `RUST_LOG=jackc=debug jackc src/`.
use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod batch;
mod diagnostics;
mod tokens;

use batch::{BatchOptions, Status};

#[derive(Parser, Debug)]
#[command(name = "jackc", version, about = "Compile Jack classes to stack VM code")]
struct Cli {
    /// `.jack` files, or directories whose `.jack` files form one batch
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Write outputs here instead of next to each source
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Write each unit's tokens to `<Name>T.xml` instead of compiling it
    #[arg(long)]
    tokens: bool,

    /// Accept NAME as a class defined outside the batch
    #[arg(long = "extern", value_name = "NAME")]
    externs: Vec<String>,

    /// Stop writing outputs after the first failed unit
    #[arg(long)]
    fail_fast: bool,

    /// Worker threads, 0 picks one per core
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Only report failures
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.jobs)
            .build_global()
            .context("cannot start worker threads")?;
    }
    if let Some(dir) = &cli.out_dir {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let units = batch::discover(&cli.paths)?;
    let options = BatchOptions {
        out_dir: cli.out_dir,
        tokens: cli.tokens,
        externs: cli.externs,
        fail_fast: cli.fail_fast,
    };
    let outcomes = batch::run(&units, &options);

    for outcome in &outcomes {
        match &outcome.status {
            Status::Written(target) if !cli.quiet => {
                println!("{} -> {}", outcome.unit.source.display(), target.display());
            }
            Status::Written(_) => {}
            Status::Failed(failure) => {
                diagnostics::report(&outcome.unit.source, &outcome.source, failure);
            }
            Status::Skipped if !cli.quiet => {
                eprintln!("skipped {}", outcome.unit.source.display());
            }
            Status::Skipped => {}
        }
    }

    let failures = batch::failure_count(&outcomes);
    if failures > 0 {
        eprintln!("{failures} of {} unit(s) failed", outcomes.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
