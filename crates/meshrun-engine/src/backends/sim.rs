use crate::{EngineError, PollReport, RunSettings, RunnerBackend, diagnostic_state_options};
use async_trait::async_trait;
use meshrun_model::{Case, Stage, StateOptions};
use std::collections::HashMap;
use std::sync::Arc;

/// In-process simulator backend.
///
/// Jobs run for a configurable number of polls and then finish with a
/// per-stage diagnostic string (default `"OK"`), translated through
/// the shared diagnostic parser. Used for demos and as the reference
/// backend in tests.
pub struct SimBackend {
    next_id: u64,
    running_polls: u32,
    outcomes: HashMap<String, String>,
    remaining: HashMap<String, u32>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self {
            next_id: 1,
            running_polls: 1,
            outcomes: HashMap::new(),
            remaining: HashMap::new(),
        }
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polls a job reports `RUNNING` before finishing.
    pub fn running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// Programs the diagnostic a stage finishes with.
    pub fn outcome(mut self, stage: impl Into<String>, diag: impl Into<String>) -> Self {
        self.outcomes.insert(stage.into(), diag.into());
        self
    }
}

#[async_trait]
impl RunnerBackend for SimBackend {
    async fn start_current(
        &mut self,
        chain: &[Arc<Stage>],
        settings: &RunSettings,
    ) -> Result<(), EngineError> {
        let current = chain
            .last()
            .ok_or_else(|| EngineError::backend("empty submission chain"))?;
        let jobid = format!("sim-{}", self.next_id);
        self.next_id += 1;
        for stage in chain {
            stage.with_result(|result| {
                result.job.jobid = jobid.clone();
                result.job.server = settings.server.clone();
                result.job.name = stage.name.clone();
                result.job.mode = settings.mode;
                result.job.memory_mb = settings.memory_mb;
                result.job.time_limit_s = settings.time_limit_s;
                result.job.start_time = Some(crate::runner::now_epoch());
                result.job.description = settings.description.clone();
            });
        }
        current.with_result(|result| {
            result.state = result.state.with_primary(StateOptions::RUNNING);
        });
        self.remaining
            .insert(current.name.clone(), self.running_polls);
        Ok(())
    }

    async fn poll(&mut self, current: &Arc<Stage>) -> Result<PollReport, EngineError> {
        let left = self.remaining.entry(current.name.clone()).or_insert(0);
        if *left > 0 {
            *left -= 1;
            return Ok(PollReport {
                state: StateOptions::RUNNING,
                log_delta: Some(format!("{} running\n", current.name)),
                messages: Vec::new(),
            });
        }
        let diag = self
            .outcomes
            .get(&current.name)
            .cloned()
            .unwrap_or_else(|| "OK".to_string());
        Ok(PollReport {
            state: diagnostic_state_options(&diag),
            log_delta: None,
            messages: vec![diag],
        })
    }

    async fn stop_current(&mut self, current: &Arc<Stage>) -> Result<bool, EngineError> {
        Ok(!current.state().is_finished())
    }

    async fn fetch_results(&mut self, _current: &Arc<Stage>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cleanup(&mut self, _case: &Case) -> Result<(), EngineError> {
        self.remaining.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaseRunner, QueueRunner, RunParams};
    use meshrun_model::{ExecMode, linear_case};

    fn params() -> RunParams {
        RunParams {
            server: Some("localhost".to_string()),
            version: Some("stable".to_string()),
            mode: Some(ExecMode::Batch),
            memory_mb: Some(2048),
            time_limit_s: Some(3600),
            ..RunParams::default()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn simulator_runs_a_linear_case_to_success() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1", "s2"]));
        let mut runner = QueueRunner::new(case.clone(), SimBackend::new());
        runner.start(params()).await.expect("start should succeed");

        // First refresh: s1 still running.
        runner.refresh().await.expect("refresh should succeed");
        assert!(
            case.stage(0)
                .expect("stage 0")
                .state()
                .contains(StateOptions::RUNNING)
        );

        // Three more refreshes complete s1 then s2.
        runner.refresh().await.expect("refresh should succeed");
        runner.refresh().await.expect("refresh should succeed");
        runner.refresh().await.expect("refresh should succeed");
        assert!(runner.is_finished());
        for stage in case.stages() {
            assert!(stage.state().contains(StateOptions::SUCCESS));
            assert!(stage.result_snapshot().job.is_submitted());
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn programmed_warning_outcome_carries_aux_flags() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1"]));
        let backend = SimBackend::new().running_polls(0).outcome("s1", "<A>_ALARM");
        let mut runner = QueueRunner::new(case.clone(), backend);
        runner.start(params()).await.expect("start should succeed");
        runner.refresh().await.expect("refresh should succeed");

        let state = case.stage(0).expect("stage 0").state();
        assert!(state.contains(StateOptions::SUCCESS | StateOptions::WARN));
        assert_eq!(
            case.stage(0).expect("stage 0").result_snapshot().messages,
            vec!["<A>_ALARM".to_string()]
        );
    }
}
