use super::{JobId, JobState, SchedulerError, SubmitRequest};
use crate::config::ClusterConfig;
use std::{
    io::Read,
    process::{Child, Command, Stdio},
    time::Duration,
};
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// Backend that shells out to the Slurm user commands.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: String,
    squeue: String,
    timeout: Duration,
}

struct Reply {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl SlurmScheduler {
    pub fn load(config: &ClusterConfig) -> Self {
        Self {
            sbatch: config.sbatch.clone(),
            squeue: config.squeue.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    #[tracing::instrument(skip(self, request), fields(name = %request.name), level = "debug")]
    pub fn submit(&self, request: &SubmitRequest) -> Result<JobId, SchedulerError> {
        let args = submit_args(request);
        trace!(args = ?args, "Assembled sbatch arguments");

        let reply = self.run(&self.sbatch, &args)?;
        if !reply.success {
            return Err(SchedulerError::Rejected {
                name: request.name.clone(),
                code: reply.code,
                diagnostic: reply.stderr.trim().to_owned(),
            });
        }

        parse_job_id(&reply.stdout).ok_or_else(|| SchedulerError::UnexpectedOutput {
            command: self.sbatch.clone(),
            output: reply.stdout.clone(),
        })
    }

    pub fn state(&self, job: JobId) -> Result<JobState, SchedulerError> {
        let args = vec![
            "-h".to_owned(),
            "-j".to_owned(),
            job.to_string(),
            "-o".to_owned(),
            "%t".to_owned(),
        ];

        let reply = self.run(&self.squeue, &args)?;
        if !reply.success {
            // a job that already left the queue makes squeue fail with an
            // invalid id complaint
            if reply.stderr.contains("Invalid job id") {
                return Ok(JobState::Completed);
            }
            return Err(SchedulerError::QueryFailed {
                command: self.squeue.clone(),
                code: reply.code,
                diagnostic: reply.stderr.trim().to_owned(),
            });
        }

        let code = reply.stdout.lines().map(str::trim).find(|line| !line.is_empty());
        let Some(code) = code else {
            // listed nothing: no longer queued
            return Ok(JobState::Completed);
        };

        let state = parse_state(code);
        if state == JobState::Unknown {
            warn!(job = %job, code, "squeue reported a state outside the known set");
        }

        Ok(state)
    }

    pub fn jobs_named(&self, name: &str) -> Result<Vec<JobId>, SchedulerError> {
        let args = vec![
            "--noheader".to_owned(),
            "--states=all".to_owned(),
            format!("--name={name}"),
            "-o".to_owned(),
            "%F".to_owned(),
        ];

        let reply = self.run(&self.squeue, &args)?;
        if !reply.success {
            return Err(SchedulerError::QueryFailed {
                command: self.squeue.clone(),
                code: reply.code,
                diagnostic: reply.stderr.trim().to_owned(),
            });
        }

        // one line per task, so the same id can show up many times
        let mut ids = Vec::new();
        for line in reply.stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let id = line
                .parse()
                .map(JobId)
                .map_err(|_| SchedulerError::UnexpectedOutput {
                    command: self.squeue.clone(),
                    output: line.to_owned(),
                })?;

            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        debug!(name, ids = ?ids, "Queried jobs by name");
        Ok(ids)
    }

    fn run(&self, command: &str, args: &[String]) -> Result<Reply, SchedulerError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SchedulerError::Spawn {
                command: command.to_owned(),
                source,
            })?;

        let waited = child
            .wait_timeout(self.timeout)
            .map_err(|source| SchedulerError::Wait {
                command: command.to_owned(),
                source,
            })?;

        let status = match waited {
            Some(status) => status,
            None => {
                // reap the runaway command before giving up
                let _ = child.kill();
                let _ = child.wait();
                return Err(SchedulerError::CommandTimeout {
                    command: command.to_owned(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        Ok(Reply {
            success: status.success(),
            code: status.code(),
            stdout: read_pipe(command, &mut child, true)?,
            stderr: read_pipe(command, &mut child, false)?,
        })
    }
}

fn read_pipe(command: &str, child: &mut Child, stdout: bool) -> Result<String, SchedulerError> {
    let mut buffer = String::new();
    let result = match stdout {
        true => child.stdout.take().map(|mut pipe| pipe.read_to_string(&mut buffer)),
        false => child.stderr.take().map(|mut pipe| pipe.read_to_string(&mut buffer)),
    };

    match result {
        Some(Err(source)) => Err(SchedulerError::Wait {
            command: command.to_owned(),
            source,
        }),
        _ => Ok(buffer),
    }
}

/// sbatch argument list for one request, --parsable keeps stdout machine
/// readable.
fn submit_args(request: &SubmitRequest) -> Vec<String> {
    let mut args = vec![
        "--parsable".to_owned(),
        format!("--job-name={}", request.name),
        format!("--partition={}", request.pool),
        format!("--time={}", request.walltime),
        format!("--output={}", request.log_pattern),
    ];

    if let Some(array) = request.array {
        args.push(match array.throttle {
            Some(limit) => format!("--array=0-{}%{limit}", array.tasks - 1),
            None => format!("--array=0-{}", array.tasks - 1),
        });
    }

    if let Some(dependency) = &request.dependency {
        args.push(format!("--dependency={dependency}"));
    }

    args.push(format!("--wrap={}", request.command));
    args
}

/// With --parsable sbatch prints "<id>" or "<id>;<cluster>".
fn parse_job_id(stdout: &str) -> Option<JobId> {
    let token = stdout.trim().split(';').next()?;
    token.parse().ok().map(JobId)
}

/// Map the squeue compact state codes onto the small set the coordinator
/// cares about.
fn parse_state(code: &str) -> JobState {
    match code {
        "PD" => JobState::Pending,
        "CF" => JobState::Configuring,
        "R" | "CG" => JobState::Running,
        "CD" => JobState::Completed,
        "F" | "CA" | "TO" | "NF" | "PR" | "BF" | "OOM" | "DL" | "ST" | "S" => JobState::Stopped,
        _ => JobState::Unknown,
    }
}
