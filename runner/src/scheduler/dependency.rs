use super::JobId;
use itertools::Itertools;
use std::fmt;

/// Dependency condition understood by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Start only once every listed job finished successfully.
    AfterOk,
    /// Start once every listed job reached a terminal state, failed or not.
    AfterAny,
}

impl Condition {
    fn keyword(self) -> &'static str {
        match self {
            Self::AfterOk => "afterok",
            Self::AfterAny => "afterany",
        }
    }
}

/// A "wait for all of these" expression over one or more job ids, composed
/// once and consumed by exactly one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyExpression {
    condition: Condition,
    ids: Vec<JobId>,
}

impl DependencyExpression {
    pub fn after_ok(id: JobId) -> Self {
        Self {
            condition: Condition::AfterOk,
            ids: vec![id],
        }
    }

    /// Compose over all `ids`, kept in the order given.
    pub fn after_any(ids: Vec<JobId>) -> Self {
        Self {
            condition: Condition::AfterAny,
            ids,
        }
    }
}

impl fmt::Display for DependencyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.condition.keyword(), self.ids.iter().join(":"))
    }
}
