pub mod dependency;
#[cfg(test)]
pub mod scripted;
mod slurm;

use crate::config::ClusterConfig;
use self::dependency::DependencyExpression;
use std::fmt;
use thiserror::Error;

/// Identifier the scheduler hands out for one submission.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue state of a job as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Configuring,
    Running,
    Completed,
    Stopped,
    Unknown,
}

/// Task layout of an array submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArraySpec {
    pub tasks: usize,
    pub throttle: Option<usize>,
}

/// One submission, fully parameterized. The run name only ever travels inside
/// `name` and `command`, no shared script file is rewritten per run.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub pool: String,
    pub walltime: String,
    pub log_pattern: String,
    pub array: Option<ArraySpec>,
    pub dependency: Option<DependencyExpression>,
    pub command: String,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to spawn {command}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("Lost contact with a running {command}")]
    Wait {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} did not reply within {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },
    #[error("Submission of {name} was rejected: {diagnostic}")]
    Rejected {
        name: String,
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("Query with {command} failed: {diagnostic}")]
    QueryFailed {
        command: String,
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("Could not parse reply from {command}: {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

/// All scheduler backends, initialized through `Schedulers::load`
/// (kept as an enum, no dynamic dispatch)
#[derive(Debug)]
pub enum Schedulers {
    Slurm(slurm::SlurmScheduler),
    #[cfg(test)]
    Scripted(scripted::ScriptedScheduler),
}

impl Schedulers {
    pub fn load(config: &ClusterConfig) -> Self {
        Self::Slurm(slurm::SlurmScheduler::load(config))
    }

    /// Submit one job, returns the id the scheduler assigned.
    pub fn submit(&mut self, request: &SubmitRequest) -> Result<JobId, SchedulerError> {
        match self {
            Self::Slurm(slurm) => slurm.submit(request),
            #[cfg(test)]
            Self::Scripted(scripted) => scripted.submit(request),
        }
    }

    /// Current queue state of one job, a single synchronous query per call.
    pub fn state(&mut self, job: JobId) -> Result<JobState, SchedulerError> {
        match self {
            Self::Slurm(slurm) => slurm.state(job),
            #[cfg(test)]
            Self::Scripted(scripted) => scripted.state(job),
        }
    }

    /// Every job id currently known under `name`, recently finished jobs
    /// included.
    pub fn jobs_named(&mut self, name: &str) -> Result<Vec<JobId>, SchedulerError> {
        match self {
            Self::Slurm(slurm) => slurm.jobs_named(name),
            #[cfg(test)]
            Self::Scripted(scripted) => scripted.jobs_named(name),
        }
    }
}
