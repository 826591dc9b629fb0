use crate::{
    config::RunnerConfig,
    scheduler::{
        dependency::DependencyExpression, ArraySpec, JobId, JobState, SchedulerError, Schedulers,
        SubmitRequest,
    },
    stage,
    worklist::{Chunk, WorkList, WorkListError},
};
use itertools::Itertools;
use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One end to end run as requested on the command line.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub work_list: PathBuf,
    pub run_name: String,
    pub job_limit: usize,
    pub partitions: usize,
    pub overwrite: bool,
    pub skip_post: bool,
}

/// Stations of the submission chain, used to tag where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    PreSubmitted,
    ProcessingSubmitted,
    PostSubmitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    CompletedWithoutPost,
}

/// Everything that reached the queue for one run.
#[derive(Debug)]
pub struct PipelineResult {
    pub outcome: Outcome,
    pub pre: JobId,
    pub processing: Vec<JobId>,
    pub arrays: Vec<JobId>,
    pub post: Option<JobId>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    WorkList(#[from] WorkListError),

    #[error("Run name {0:?} must be non-empty and alphanumeric")]
    InvalidRunName(String),

    #[error("{stage:?} submission was rejected, jobs already in the queue: {submitted:?}")]
    Submission {
        stage: PipelineStage,
        source: SchedulerError,
        submitted: Vec<JobId>,
    },

    #[error("Scheduler query failed, jobs already in the queue: {submitted:?}")]
    Query {
        source: SchedulerError,
        submitted: Vec<JobId>,
    },

    #[error("Job {job} reported a state outside the known set, cancel the run manually: {submitted:?}")]
    UnknownSchedulerState { job: JobId, submitted: Vec<JobId> },

    #[error("Schedule did not settle within {limit_secs}s, cancel the run manually if needed: {submitted:?}")]
    Timeout { limit_secs: u64, submitted: Vec<JobId> },

    #[error("No array job appeared for {name}, cancel the run manually: {submitted:?}")]
    ArrayNotMaterialized { name: String, submitted: Vec<JobId> },
}

/// Drives one run through the submission chain. All heavy lifting happens on
/// the cluster, this only sequences submissions and waits for the schedule.
pub struct PipelineCoordinator<'a> {
    config: &'a RunnerConfig,
    scheduler: &'a mut Schedulers,
}

impl<'a> PipelineCoordinator<'a> {
    pub fn new(config: &'a RunnerConfig, scheduler: &'a mut Schedulers) -> Self {
        Self { config, scheduler }
    }

    #[tracing::instrument(skip_all, fields(run = %request.run_name), level = "info")]
    pub fn run(&mut self, request: &RunRequest) -> Result<PipelineResult, PipelineError> {
        // nothing may reach the queue before validation passed
        if request.run_name.is_empty()
            || !request.run_name.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(PipelineError::InvalidRunName(request.run_name.clone()));
        }

        let work_list = WorkList::from_file(&request.work_list)?;
        // no partitioning requested still means one array job over everything
        let chunks = work_list.partition(request.partitions.max(1))?;
        info!(items = work_list.len(), chunks = chunks.len(), "Validated work list");

        let pre = self.submit_pre(request)?;
        info!(job = %pre, pool = %self.config.cluster.pre_pool, "Pre-processing submitted");

        let mut processing = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let job = self.submit_chunk(request, chunk, pre, &processing)?;
            info!(job = %job, tasks = chunk.len(), chunk = chunk.index, "Processing chunk submitted");
            processing.push(job);
        }

        self.await_stable_schedule(pre, &processing)?;

        // the scheduler materializes one array entity per chunk, their real
        // ids come from a query, never from id arithmetic
        let arrays = self.discover_arrays(request, &chunks, pre, &processing)?;

        if request.skip_post {
            info!("Post-processing skipped on request");
            return Ok(PipelineResult {
                outcome: Outcome::CompletedWithoutPost,
                pre,
                processing,
                arrays,
                post: None,
            });
        }

        // aggregation runs once every array job is done, failed tasks
        // included
        let post = self.submit_post(request, pre, &processing, &arrays)?;
        info!(job = %post, pool = %self.config.cluster.post_pool, "Post-processing submitted");

        Ok(PipelineResult {
            outcome: Outcome::Completed,
            pre,
            processing,
            arrays,
            post: Some(post),
        })
    }

    fn submit_pre(&mut self, request: &RunRequest) -> Result<JobId, PipelineError> {
        let name = format!("{}_pre", request.run_name);
        let submit = SubmitRequest {
            pool: self.config.cluster.pre_pool.clone(),
            walltime: self.config.stages.pre.walltime.clone(),
            log_pattern: self.log_pattern(&name, false),
            array: None,
            dependency: None,
            command: stage::pre_command(
                self.config,
                &request.run_name,
                request.job_limit,
                request.overwrite,
            ),
            name,
        };

        self.scheduler
            .submit(&submit)
            .map_err(|source| PipelineError::Submission {
                stage: PipelineStage::PreSubmitted,
                source,
                submitted: Vec::new(),
            })
    }

    fn submit_chunk(
        &mut self,
        request: &RunRequest,
        chunk: &Chunk,
        pre: JobId,
        processing: &[JobId],
    ) -> Result<JobId, PipelineError> {
        let name = chunk_name(&request.run_name, chunk.index);
        let submit = SubmitRequest {
            pool: format!("{}_{}", self.config.cluster.compute_pool_prefix, chunk.index),
            walltime: self.config.stages.unit.walltime.clone(),
            log_pattern: self.log_pattern(&name, true),
            array: Some(ArraySpec {
                tasks: chunk.len(),
                throttle: self.config.cluster.array_throttle,
            }),
            // none of the units may start on an incomplete folder setup
            dependency: Some(DependencyExpression::after_ok(pre)),
            command: stage::unit_command(self.config, &request.run_name, request.job_limit, chunk),
            name,
        };

        self.scheduler
            .submit(&submit)
            .map_err(|source| PipelineError::Submission {
                stage: PipelineStage::ProcessingSubmitted,
                source,
                submitted: submitted_so_far(pre, processing),
            })
    }

    /// Poll the chunk submissions until every one has left the pending and
    /// configuring phase, or the configured wait limit is reached.
    fn await_stable_schedule(
        &mut self,
        pre: JobId,
        processing: &[JobId],
    ) -> Result<(), PipelineError> {
        let interval = Duration::from_secs(self.config.cluster.poll_interval_secs);
        let limit = Duration::from_secs(self.config.cluster.max_schedule_wait_secs);
        let started = Instant::now();
        let submitted = submitted_so_far(pre, processing);
        let mut waiting = processing.to_vec();

        loop {
            let mut still_waiting = Vec::with_capacity(waiting.len());

            for job in waiting {
                let state =
                    self.scheduler
                        .state(job)
                        .map_err(|source| PipelineError::Query {
                            source,
                            submitted: submitted.clone(),
                        })?;

                match state {
                    JobState::Pending | JobState::Configuring => still_waiting.push(job),
                    JobState::Running | JobState::Completed => {
                        debug!(job = %job, state = ?state, "Job scheduled")
                    }
                    JobState::Stopped => {
                        // partial failure: aggregation still runs over
                        // whatever the other tasks produce
                        warn!(job = %job, "Processing job already failed, continuing")
                    }
                    JobState::Unknown => {
                        return Err(PipelineError::UnknownSchedulerState {
                            job,
                            submitted: submitted.clone(),
                        })
                    }
                }
            }

            if still_waiting.is_empty() {
                info!(waited_secs = started.elapsed().as_secs(), "Schedule settled");
                return Ok(());
            }

            if started.elapsed() >= limit {
                return Err(PipelineError::Timeout {
                    limit_secs: self.config.cluster.max_schedule_wait_secs,
                    submitted,
                });
            }

            debug!(waiting = ?still_waiting, "Schedule not settled yet");
            thread::sleep(interval);
            waiting = still_waiting;
        }
    }

    fn discover_arrays(
        &mut self,
        request: &RunRequest,
        chunks: &[Chunk],
        pre: JobId,
        processing: &[JobId],
    ) -> Result<Vec<JobId>, PipelineError> {
        let submitted = submitted_so_far(pre, processing);
        let mut arrays = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let name = chunk_name(&request.run_name, chunk.index);
            let named = self
                .scheduler
                .jobs_named(&name)
                .map_err(|source| PipelineError::Query {
                    source,
                    submitted: submitted.clone(),
                })?;

            let children = named
                .into_iter()
                .filter(|id| !processing.contains(id))
                .collect_vec();

            if children.is_empty() {
                return Err(PipelineError::ArrayNotMaterialized { name, submitted });
            }
            if children.len() > 1 {
                warn!(name = %name, arrays = ?children, "Several array jobs share this name, waiting on all of them");
            }

            debug!(name = %name, arrays = ?children, "Discovered array jobs");
            arrays.extend(children);
        }

        Ok(arrays)
    }

    fn submit_post(
        &mut self,
        request: &RunRequest,
        pre: JobId,
        processing: &[JobId],
        arrays: &[JobId],
    ) -> Result<JobId, PipelineError> {
        let name = format!("{}_post", request.run_name);
        let submit = SubmitRequest {
            pool: self.config.cluster.post_pool.clone(),
            walltime: self.config.stages.post.walltime.clone(),
            log_pattern: self.log_pattern(&name, false),
            array: None,
            dependency: Some(DependencyExpression::after_any(arrays.to_vec())),
            command: stage::post_command(self.config, &request.run_name, request.job_limit),
            name,
        };

        self.scheduler
            .submit(&submit)
            .map_err(|source| PipelineError::Submission {
                stage: PipelineStage::PostSubmitted,
                source,
                submitted: submitted_so_far(pre, processing)
                    .into_iter()
                    .chain(arrays.iter().copied())
                    .collect(),
            })
    }

    fn log_pattern(&self, name: &str, array: bool) -> String {
        let file = match array {
            true => format!("{name}_%A_%a.out"),
            false => format!("{name}_%j.out"),
        };

        self.config
            .cluster
            .log_dir
            .join(file)
            .to_string_lossy()
            .into_owned()
    }
}

fn chunk_name(run_name: &str, index: usize) -> String {
    format!("{run_name}_{index}")
}

fn submitted_so_far(pre: JobId, processing: &[JobId]) -> Vec<JobId> {
    std::iter::once(pre).chain(processing.iter().copied()).collect()
}
