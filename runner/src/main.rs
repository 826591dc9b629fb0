mod config;
mod coordinator;
mod scheduler;
mod stage;
mod worklist;

use crate::{
    config::RunnerConfig,
    coordinator::{Outcome, PipelineCoordinator, PipelineError, RunRequest},
    scheduler::{SchedulerError, Schedulers},
};
use clap::Parser;
use std::{error::Error, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chunk a HUC work list and chain the FIM batch stages on a Slurm cluster.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Work list file, one HUC per line
    #[arg(short = 'l', long)]
    list: PathBuf,

    /// Tag for this run, alphanumeric; job names, logs and the output folder
    /// are derived from it
    #[arg(short = 'n', long)]
    run_name: String,

    /// Branch concurrency limit handed to every stage
    #[arg(short = 'j', long, default_value_t = 1)]
    job_limit: usize,

    /// Compute pools to spread the chunks over, 0 runs everything as one
    /// array job
    #[arg(short = 'p', long, default_value_t = 0)]
    partitions: usize,

    /// Let the pre stage replace an existing output folder
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Leave the aggregation stage out of the chain
    #[arg(long)]
    skip_post: bool,

    /// Runner configuration
    #[arg(short = 'c', long, default_value = "fim.yaml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match RunnerConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            report(&error);
            return ExitCode::FAILURE;
        }
    };
    if config.preflight_checks() {
        return ExitCode::FAILURE;
    }

    let request = RunRequest {
        work_list: cli.list,
        run_name: cli.run_name,
        job_limit: cli.job_limit,
        partitions: cli.partitions,
        overwrite: cli.overwrite,
        skip_post: cli.skip_post,
    };

    let mut scheduler = Schedulers::load(&config.cluster);
    match PipelineCoordinator::new(&config, &mut scheduler).run(&request) {
        Ok(result) => {
            info!(
                pre = %result.pre,
                processing = ?result.processing,
                arrays = ?result.arrays,
                post = ?result.post,
                "Run submitted, track progress with squeue"
            );
            if result.outcome == Outcome::CompletedWithoutPost {
                info!("Aggregation was skipped, run it manually once the arrays finish");
            }

            ExitCode::SUCCESS
        }
        Err(error) => {
            report(&error);
            exit_code(&error)
        }
    }
}

/// Log an error together with its whole cause chain.
fn report(error: &dyn Error) {
    error!("{error}");
    let mut cause = error.source();
    while let Some(inner) = cause {
        error!("  caused by: {inner}");
        cause = inner.source();
    }
}

/// Submission failures keep the scheduler's own exit code, everything else is
/// a plain failure.
fn exit_code(error: &PipelineError) -> ExitCode {
    match error {
        PipelineError::Submission {
            source: SchedulerError::Rejected {
                code: Some(code), ..
            },
            ..
        } => u8::try_from(*code)
            .map(ExitCode::from)
            .unwrap_or(ExitCode::FAILURE),
        _ => ExitCode::FAILURE,
    }
}
