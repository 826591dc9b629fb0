use super::{JobId, JobState, SchedulerError, SubmitRequest};
use std::collections::{HashMap, VecDeque};

/// In memory stand-in for the cluster. Hands out sequential ids, records
/// every submission and replays scripted state sequences.
#[derive(Debug, Default)]
pub struct ScriptedScheduler {
    pub submissions: Vec<SubmitRequest>,
    pub handles: Vec<JobId>,
    next_id: u64,
    rejected: Vec<String>,
    states: HashMap<String, VecDeque<JobState>>,
    by_name: HashMap<String, Vec<JobId>>,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self {
            next_id: 100,
            ..Self::default()
        }
    }

    /// Reject any submission carrying this job name.
    pub fn reject(&mut self, name: &str) {
        self.rejected.push(name.to_owned());
    }

    /// Replay these states in order for polls of the job named `name`, the
    /// last entry repeats forever.
    pub fn script(&mut self, name: &str, states: impl IntoIterator<Item = JobState>) {
        self.states.insert(name.to_owned(), states.into_iter().collect());
    }

    fn allocate(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn submit(&mut self, request: &SubmitRequest) -> Result<JobId, SchedulerError> {
        if self.rejected.contains(&request.name) {
            return Err(SchedulerError::Rejected {
                name: request.name.clone(),
                code: Some(1),
                diagnostic: "Batch job submission failed: Invalid partition name specified"
                    .to_owned(),
            });
        }

        let id = self.allocate();
        self.submissions.push(request.clone());
        self.handles.push(id);
        self.by_name.entry(request.name.clone()).or_default().push(id);

        // an array submission materializes a second entity under the same
        // name, carrying the next id the scheduler hands out
        if request.array.is_some() {
            let array = self.allocate();
            self.by_name.entry(request.name.clone()).or_default().push(array);
        }

        Ok(id)
    }

    pub fn state(&mut self, job: JobId) -> Result<JobState, SchedulerError> {
        let name = self
            .handles
            .iter()
            .position(|handle| *handle == job)
            .map(|index| self.submissions[index].name.clone());

        let Some(name) = name else {
            return Ok(JobState::Completed);
        };

        let state = match self.states.get_mut(&name) {
            Some(states) if states.len() > 1 => states.pop_front().unwrap(),
            Some(states) => *states.front().unwrap_or(&JobState::Running),
            None => JobState::Running,
        };

        Ok(state)
    }

    pub fn jobs_named(&mut self, name: &str) -> Result<Vec<JobId>, SchedulerError> {
        Ok(self.by_name.get(name).cloned().unwrap_or_default())
    }
}
