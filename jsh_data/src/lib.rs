use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a job slot in the job table. Stable for the lifetime of the job
/// and reused once the slot goes back to `Empty`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Empty,
    Running,
    Terminated,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JobStatus::Empty => "EMPTY",
            JobStatus::Running => "RUNNING",
            JobStatus::Terminated => "TERMINATED",
        };
        f.write_str(text)
    }
}

/// What a `jobs` listing reports for one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub command_line: String,
}

impl JobSummary {
    pub fn new(id: JobId, status: JobStatus, command_line: &str) -> Self {
        Self {
            id,
            status,
            command_line: command_line.to_string(),
        }
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}\t\t{}", self.id, self.status, self.command_line)
    }
}

#[cfg(test)]
mod test {
    use super::{JobId, JobStatus, JobSummary};

    #[test]
    fn test_summary_display() {
        let summary = JobSummary::new(JobId(3), JobStatus::Running, "sleep 4 | cat");
        assert_eq!("[3] RUNNING\t\tsleep 4 | cat", summary.to_string());
    }
}
