use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to open config at {path:?}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Invalid(#[from] serde_yaml::Error),
    #[error("Config did not pass the preflight checks")]
    FailedPreflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub cluster: ClusterConfig,
    pub container: ContainerConfig,
    pub stages: StagesConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    // pool the folder setup job lands in
    #[serde(default = "default_pre_pool")]
    pub pre_pool: String,
    // chunk i is sent to the pool "{compute_pool_prefix}_{i}"
    #[serde(default = "default_compute_prefix")]
    pub compute_pool_prefix: String,
    #[serde(default = "default_post_pool")]
    pub post_pool: String,
    #[serde(default = "default_sbatch")]
    pub sbatch: String,
    #[serde(default = "default_squeue")]
    pub squeue: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_schedule_wait")]
    pub max_schedule_wait_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    // optional site wide cap on concurrently running array tasks
    #[serde(default)]
    pub array_throttle: Option<usize>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default = "default_runtime")]
    pub runtime: String,
    pub image: PathBuf,
    // "host:container" mount pairs
    #[serde(default)]
    pub binds: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StagesConfig {
    pub pre: StageConfig,
    pub unit: StageConfig,
    pub post: StageConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    // entry point of the stage inside the container
    pub script: String,
    #[serde(default = "default_walltime")]
    pub walltime: String,
}

impl RunnerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::Unreadable {
            path: path.to_owned(),
            source,
        })?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// Walk the whole config and report every problem at once, true when
    /// anything failed.
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make
        // debugging easier for users
        let mut contains_error = false;

        if self.cluster.poll_interval_secs == 0 {
            error!("cluster.poll_interval_secs cannot be 0");
            contains_error = true;
        }

        if self.cluster.max_schedule_wait_secs < self.cluster.poll_interval_secs {
            error!("cluster.max_schedule_wait_secs is shorter than one poll interval");
            contains_error = true;
        }

        if self.cluster.command_timeout_secs == 0 {
            error!("cluster.command_timeout_secs cannot be 0");
            contains_error = true;
        }

        for (name, pool) in [
            ("pre_pool", &self.cluster.pre_pool),
            ("compute_pool_prefix", &self.cluster.compute_pool_prefix),
            ("post_pool", &self.cluster.post_pool),
        ] {
            if pool.is_empty() {
                error!("cluster.{name} cannot be empty");
                contains_error = true;
            }
        }

        if self.container.image.as_os_str().is_empty() {
            error!("container.image cannot be empty");
            contains_error = true;
        }

        for bind in &self.container.binds {
            if !bind.contains(':') {
                error!("container.binds entry {bind:?} is not a host:container pair");
                contains_error = true;
            }
        }

        for (name, stage) in [
            ("pre", &self.stages.pre),
            ("unit", &self.stages.unit),
            ("post", &self.stages.post),
        ] {
            if stage.script.is_empty() {
                error!("stages.{name}.script cannot be empty");
                contains_error = true;
            }

            if !stage.walltime.contains(':') {
                error!(
                    "stages.{name}.walltime ({}) does not look like a scheduler time limit",
                    stage.walltime
                );
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_pre_pool() -> String {
    "pre-processing".to_owned()
}

fn default_compute_prefix() -> String {
    "compute".to_owned()
}

fn default_post_pool() -> String {
    "post-processing".to_owned()
}

fn default_sbatch() -> String {
    "sbatch".to_owned()
}

fn default_squeue() -> String {
    "squeue".to_owned()
}

fn default_poll_interval() -> u64 {
    15
}

fn default_max_schedule_wait() -> u64 {
    900
}

fn default_command_timeout() -> u64 {
    60
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_runtime() -> String {
    "singularity".to_owned()
}

fn default_walltime() -> String {
    "08:00:00".to_owned()
}

#[cfg(test)]
mod preflight_test;
