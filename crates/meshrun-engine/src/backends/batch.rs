use crate::{
    EngineError, MeshCache, PollReport, RunSettings, RunnerBackend, ServerInfos,
    batch_state_options, resolve_state,
};
use async_trait::async_trait;
use meshrun_model::{Case, ExecMode, Stage, StateOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// Lines requested from the backend output tail on every poll.
pub const TAIL_LINES: usize = 10_000;

/// One stage's contribution to a batch job profile.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileEntry {
    pub stage: String,
    pub database_path: PathBuf,
    pub in_files: Vec<PathBuf>,
}

/// Job descriptor submitted to the legacy batch tool, covering the
/// whole stage chain of one submission.
#[derive(Clone, Debug, PartialEq)]
pub struct JobProfile {
    pub name: String,
    pub server: String,
    pub version: String,
    pub mode: ExecMode,
    pub memory_mb: u64,
    pub time_limit_s: u64,
    pub entries: Vec<ProfileEntry>,
}

/// Client contract of the legacy batch submission tool. The wire
/// protocol is a black box behind this trait.
#[async_trait]
pub trait BatchClient: Send {
    /// Submits a profile; returns the tool's return code and raw
    /// output.
    async fn submit(&mut self, profile: &JobProfile) -> Result<(i32, String), EngineError>;

    /// Tails the last `nbline` lines of job output; returns
    /// `(state, diagnostic, output)`.
    async fn tail(&mut self, nbline: usize) -> Result<(String, String, String), EngineError>;

    async fn kill(&mut self) -> Result<(), EngineError>;

    async fn get_results(&mut self) -> Result<(), EngineError>;
}

/// Runner backend for the legacy batch submission tool.
pub struct BatchBackend {
    client: Box<dyn BatchClient>,
    servers: Arc<ServerInfos>,
    mesh: Arc<MeshCache>,
    seen_output: usize,
}

impl BatchBackend {
    pub fn new(client: Box<dyn BatchClient>, servers: Arc<ServerInfos>, mesh: Arc<MeshCache>) -> Self {
        Self {
            client,
            servers,
            mesh,
            seen_output: 0,
        }
    }

    fn build_profile(&self, chain: &[Arc<Stage>], settings: &RunSettings) -> JobProfile {
        let name = chain
            .last()
            .map(|stage| stage.name.clone())
            .unwrap_or_default();
        let entries = chain
            .iter()
            .map(|stage| ProfileEntry {
                stage: stage.name.clone(),
                database_path: stage.database_path.clone(),
                in_files: stage
                    .files
                    .values()
                    .filter(|file| file.attr.is_in())
                    .filter_map(|file| match &file.reference {
                        Some(reference) => self.mesh.resolve(reference),
                        None => Some(file.filename.clone()),
                    })
                    .collect(),
            })
            .collect();
        JobProfile {
            name,
            server: settings.server.clone(),
            version: settings.version.clone(),
            mode: settings.mode,
            memory_mb: settings.memory_mb,
            time_limit_s: settings.time_limit_s,
            entries,
        }
    }
}

#[async_trait]
impl RunnerBackend for BatchBackend {
    async fn start_current(
        &mut self,
        chain: &[Arc<Stage>],
        settings: &RunSettings,
    ) -> Result<(), EngineError> {
        if !self.servers.contains(&settings.server) {
            return Err(EngineError::ServerUnavailable(settings.server.clone()));
        }
        let current = chain
            .last()
            .ok_or_else(|| EngineError::backend("empty submission chain"))?;
        let profile = self.build_profile(chain, settings);
        let (returncode, output) = self.client.submit(&profile).await?;
        if returncode != 0 {
            return Err(EngineError::Submission {
                message: format!("batch tool exited with code {returncode}"),
                output,
            });
        }

        let jobid = extract_job_id(&output);
        for stage in chain {
            stage.with_result(|result| {
                result.job.jobid = jobid.clone();
                result.job.server = settings.server.clone();
                result.job.name = profile.name.clone();
                result.job.mode = settings.mode;
                result.job.memory_mb = settings.memory_mb;
                result.job.time_limit_s = settings.time_limit_s;
                result.job.start_time = Some(crate::runner::now_epoch());
                result.job.description = settings.description.clone();
            });
        }
        current.with_result(|result| {
            result.state = result.state.with_primary(StateOptions::PENDING);
        });
        self.seen_output = 0;
        tracing::info!(jobid = %jobid, server = %settings.server, "batch job accepted");
        Ok(())
    }

    async fn poll(&mut self, _current: &Arc<Stage>) -> Result<PollReport, EngineError> {
        let (state, diag, output) = self.client.tail(TAIL_LINES).await?;
        let resolved = resolve_state(batch_state_options(&state), &diag);
        if resolved.is_finished() {
            return Ok(PollReport {
                state: resolved,
                log_delta: None,
                messages: vec![diag],
            });
        }
        // The tail is a sliding window; forward only the unseen
        // suffix. When the window shrank or the remembered offset
        // lands inside a multi-byte character, the snapshot is
        // treated as a rewrite and forwarded whole.
        let delta = match output.get(self.seen_output..) {
            Some(suffix) => (!suffix.is_empty()).then(|| suffix.to_string()),
            None => (!output.is_empty()).then(|| output.clone()),
        };
        self.seen_output = output.len();
        Ok(PollReport {
            state: resolved,
            log_delta: delta,
            messages: Vec::new(),
        })
    }

    async fn stop_current(&mut self, current: &Arc<Stage>) -> Result<bool, EngineError> {
        if current.state().is_finished() {
            return Ok(false);
        }
        // Best-effort: the local error transition never depends on
        // the backend acknowledging the kill.
        if let Err(error) = self.client.kill().await {
            tracing::debug!(stage = %current.name, error = %error, "batch kill failed");
        }
        Ok(true)
    }

    async fn fetch_results(&mut self, _current: &Arc<Stage>) -> Result<(), EngineError> {
        self.client.get_results().await
    }

    async fn cleanup(&mut self, case: &Case) -> Result<(), EngineError> {
        if case
            .stages()
            .iter()
            .any(|stage| !stage.state().is_finished() && stage.result_snapshot().job.is_submitted())
        {
            if let Err(error) = self.client.kill().await {
                tracing::debug!(case = %case.name, error = %error, "cleanup kill failed");
            }
        }
        Ok(())
    }
}

/// First run of ASCII digits in the submission output, by convention
/// the assigned job id.
fn extract_job_id(output: &str) -> String {
    let start = match output.find(|c: char| c.is_ascii_digit()) {
        Some(index) => index,
        None => return String::new(),
    };
    output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect()
}
