use crate::{config::RunnerConfig, worklist::Chunk};
use std::fmt::Write as _;

/// Container prefix shared by every stage invocation:
/// `<runtime> exec [--bind ...] <image>`.
fn container_prefix(config: &RunnerConfig) -> String {
    let mut prefix = String::with_capacity(128);
    let _ = write!(prefix, "{} exec", config.container.runtime);
    for bind in &config.container.binds {
        let _ = write!(prefix, " --bind {bind}");
    }
    let _ = write!(prefix, " {}", config.container.image.display());
    prefix
}

/// Folder and input setup for a run.
pub fn pre_command(
    config: &RunnerConfig,
    run_name: &str,
    job_limit: usize,
    overwrite: bool,
) -> String {
    let mut command = format!(
        "{} {} -n {} -j {}",
        container_prefix(config),
        config.stages.pre.script,
        run_name,
        job_limit
    );
    if overwrite {
        command.push_str(" -o");
    }
    command
}

/// Per unit processing for one chunk. Each array task picks its own work item
/// out of the positional parameters via SLURM_ARRAY_TASK_ID, the binding
/// stays within plain POSIX sh.
pub fn unit_command(
    config: &RunnerConfig,
    run_name: &str,
    job_limit: usize,
    chunk: &Chunk,
) -> String {
    let mut command = String::with_capacity(64 + 10 * chunk.len());
    let _ = write!(command, "set --");
    for item in &chunk.items {
        let _ = write!(command, " {item}");
    }
    let _ = write!(
        command,
        "; shift \"$SLURM_ARRAY_TASK_ID\"; exec {} {} -n {} -u \"$1\" -j {}",
        container_prefix(config),
        config.stages.unit.script,
        run_name,
        job_limit
    );
    command
}

/// Aggregation over everything the unit jobs produced.
pub fn post_command(config: &RunnerConfig, run_name: &str, job_limit: usize) -> String {
    format!(
        "{} {} -n {} -j {}",
        container_prefix(config),
        config.stages.post.script,
        run_name,
        job_limit
    )
}
