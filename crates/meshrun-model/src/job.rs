use serde::{Deserialize, Serialize};

/// Execution mode requested for a backend submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Batch,
    Interactive,
}

impl ExecMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Interactive => "interactive",
        }
    }
}

/// One backend submission: identifiers, resource parameters and
/// timestamps. Owned by its `RunResult`; populated by the active
/// runner at submission time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub jobid: String,
    pub server: String,
    pub name: String,
    pub mode: ExecMode,
    pub memory_mb: u64,
    pub time_limit_s: u64,
    pub nodes: Option<u32>,
    pub cpus: Option<u32>,
    pub threads: Option<u32>,
    /// Epoch seconds; `None` until the backend accepted the job.
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub description: String,
}

impl Job {
    pub fn is_submitted(&self) -> bool {
        !self.jobid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_job_is_not_submitted() {
        let job = Job::default();
        assert!(!job.is_submitted());
        assert_eq!(job.mode, ExecMode::Batch);
    }
}
