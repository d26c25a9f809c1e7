use crate::{
    EngineError, MeshCache, PollReport, RunSettings, RunnerBackend, ServerInfos,
    diagnostic_state_options, launcher_state_options,
};
use async_trait::async_trait;
use meshrun_model::{Case, ExecMode, Stage, StateOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Job descriptor handed to the cluster launcher service.
#[derive(Clone, Debug, PartialEq)]
pub struct JobDescriptor {
    pub job_name: String,
    pub server: String,
    pub version: String,
    pub mode: ExecMode,
    pub work_directory: PathBuf,
    pub in_files: Vec<PathBuf>,
    pub out_files: Vec<String>,
    pub memory_mb: u64,
    pub time_limit_s: u64,
    pub nodes: Option<u32>,
    pub cpus: Option<u32>,
    pub threads: Option<u32>,
}

/// Parameters the launcher reports for a created job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobParameters {
    pub work_directory: PathBuf,
    pub out_files: Vec<String>,
    /// Solver message file, when the backend produced one; it carries
    /// a finer-grained outcome than the launcher's coarse state.
    pub message_file: Option<PathBuf>,
    pub remote_host: Option<String>,
}

/// Client contract of the cluster job-launcher service.
#[async_trait]
pub trait LauncherClient: Send {
    async fn create_job(&mut self, descriptor: &JobDescriptor) -> Result<String, EngineError>;
    async fn launch_job(&mut self, jobid: &str) -> Result<(), EngineError>;
    async fn get_job_state(&mut self, jobid: &str) -> Result<String, EngineError>;
    async fn get_job_parameters(&mut self, jobid: &str) -> Result<JobParameters, EngineError>;
    async fn stop_job(&mut self, jobid: &str) -> Result<(), EngineError>;
    async fn get_job_results(&mut self, jobid: &str, dest: &Path) -> Result<(), EngineError>;
    /// Restores the launcher's job list from an opaque blob.
    async fn load_jobs(&mut self, blob: &[u8]) -> Result<(), EngineError>;
    /// Serializes the launcher's current job list to an opaque blob.
    async fn save_jobs(&mut self) -> Result<Vec<u8>, EngineError>;
}

/// Remote-copy primitive used when the result database lives on a
/// remote host.
#[async_trait]
pub trait RemoteCopy: Send {
    async fn copy(&mut self, host: &str, source: &Path, dest: &Path) -> Result<(), EngineError>;
}

/// Runner backend for the cluster job-launcher service.
pub struct LauncherBackend {
    client: Box<dyn LauncherClient>,
    remote: Box<dyn RemoteCopy>,
    servers: Arc<ServerInfos>,
    mesh: Arc<MeshCache>,
    case: Arc<Case>,
}

impl LauncherBackend {
    pub fn new(
        client: Box<dyn LauncherClient>,
        remote: Box<dyn RemoteCopy>,
        servers: Arc<ServerInfos>,
        mesh: Arc<MeshCache>,
        case: Arc<Case>,
    ) -> Self {
        Self {
            client,
            remote,
            servers,
            mesh,
            case,
        }
    }

    /// Restores launcher job tracking from the case's persisted blob.
    /// Best-effort: a broken blob must never block startup.
    pub async fn restore_jobs(&mut self) {
        if let Some(blob) = self.case.jobs_list() {
            if let Err(error) = self.client.load_jobs(&blob).await {
                tracing::debug!(case = %self.case.name, error = %error, "jobs list restore failed");
            }
        }
    }

    /// Serializes the launcher's job list onto the case. Best-effort.
    async fn persist_jobs(&mut self) {
        match self.client.save_jobs().await {
            Ok(blob) => self.case.set_jobs_list(Some(blob)),
            Err(error) => {
                tracing::debug!(case = %self.case.name, error = %error, "jobs list save failed");
            }
        }
    }

    fn build_descriptor(&self, chain: &[Arc<Stage>], settings: &RunSettings) -> JobDescriptor {
        let current = chain.last();
        JobDescriptor {
            job_name: current.map(|stage| stage.name.clone()).unwrap_or_default(),
            server: settings.server.clone(),
            version: settings.version.clone(),
            mode: settings.mode,
            work_directory: current
                .map(|stage| stage.folder.clone())
                .unwrap_or_default(),
            in_files: chain
                .iter()
                .flat_map(|stage| stage.files.values())
                .filter(|file| file.attr.is_in())
                .filter_map(|file| match &file.reference {
                    Some(reference) => self.mesh.resolve(reference),
                    None => Some(file.filename.clone()),
                })
                .collect(),
            out_files: chain
                .iter()
                .flat_map(|stage| stage.files.values())
                .filter(|file| file.attr.is_out())
                .filter_map(|file| {
                    file.filename
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .collect(),
            memory_mb: settings.memory_mb,
            time_limit_s: settings.time_limit_s,
            nodes: settings.nodes,
            cpus: settings.cpus,
            threads: settings.threads,
        }
    }

    /// Moves every Out-flagged file from the backend work directory
    /// into its configured destination. All matching files are moved;
    /// failures are counted, not short-circuited.
    async fn relocate_results(
        &mut self,
        current: &Arc<Stage>,
        work_directory: &Path,
    ) -> Result<(), EngineError> {
        let mut failed = 0usize;
        for file in current.files.values().filter(|file| file.attr.is_out()) {
            let Some(name) = file.filename.file_name() else {
                failed += 1;
                continue;
            };
            let source = work_directory.join(name);
            let dest = &file.filename;
            if source == *dest {
                continue;
            }
            if let Err(error) = move_file(&source, dest).await {
                tracing::warn!(
                    stage = %current.name,
                    source = %source.display(),
                    dest = %dest.display(),
                    error = %error,
                    "result file relocation failed"
                );
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(EngineError::Relocation { failed });
        }
        Ok(())
    }
}

#[async_trait]
impl RunnerBackend for LauncherBackend {
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
        let descriptor = self.build_descriptor(chain, settings);
        let jobid = self.client.create_job(&descriptor).await?;
        self.client.launch_job(&jobid).await?;

        for stage in chain {
            stage.with_result(|result| {
                result.job.jobid = jobid.clone();
                result.job.server = settings.server.clone();
                result.job.name = descriptor.job_name.clone();
                result.job.mode = settings.mode;
                result.job.memory_mb = settings.memory_mb;
                result.job.time_limit_s = settings.time_limit_s;
                result.job.nodes = settings.nodes;
                result.job.cpus = settings.cpus;
                result.job.threads = settings.threads;
                result.job.start_time = Some(crate::runner::now_epoch());
                result.job.description = settings.description.clone();
            });
        }
        current.with_result(|result| {
            result.state = result.state.with_primary(StateOptions::PENDING);
        });
        tracing::info!(jobid = %jobid, server = %settings.server, "launcher job started");
        self.persist_jobs().await;
        Ok(())
    }

    async fn poll(&mut self, current: &Arc<Stage>) -> Result<PollReport, EngineError> {
        let jobid = current.result_snapshot().job.jobid;
        let raw_state = self.client.get_job_state(&jobid).await?;
        let coarse = launcher_state_options(&raw_state, true);
        if !coarse.is_finished() {
            return Ok(PollReport {
                state: coarse,
                log_delta: None,
                messages: Vec::new(),
            });
        }

        // The launcher only knows finished/failed; the solver message
        // file carries the real diagnostic when it exists.
        let mut state = coarse;
        let mut messages = Vec::new();
        if let Ok(parameters) = self.client.get_job_parameters(&jobid).await {
            if let Some(message_file) = parameters.message_file {
                match tokio::fs::read_to_string(&message_file).await {
                    Ok(content) => {
                        let (refined, extracted) = scan_message_file(&content, coarse);
                        state = refined;
                        messages = extracted;
                    }
                    Err(error) => {
                        tracing::debug!(
                            file = %message_file.display(),
                            error = %error,
                            "message file unreadable; keeping launcher state"
                        );
                    }
                }
            }
        }
        Ok(PollReport {
            state,
            log_delta: None,
            messages,
        })
    }

    async fn stop_current(&mut self, current: &Arc<Stage>) -> Result<bool, EngineError> {
        if current.state().is_finished() {
            return Ok(false);
        }
        let jobid = current.result_snapshot().job.jobid;
        self.client.stop_job(&jobid).await?;
        Ok(true)
    }

    async fn fetch_results(&mut self, current: &Arc<Stage>) -> Result<(), EngineError> {
        let snapshot = current.result_snapshot();
        let jobid = snapshot.job.jobid;
        let parameters = self.client.get_job_parameters(&jobid).await?;

        if snapshot.has_remote {
            // The result database lives on a remote host; bypass the
            // launcher's result fetch entirely.
            let host = parameters
                .remote_host
                .clone()
                .unwrap_or_else(|| snapshot.job.server.clone());
            let db_name = current
                .database_path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_default();
            let source = parameters.work_directory.join(db_name);
            self.remote
                .copy(&host, &source, &current.database_path)
                .await?;
        } else {
            self.client.get_job_results(&jobid, &current.folder).await?;
        }

        self.relocate_results(current, &parameters.work_directory)
            .await
    }

    async fn cleanup(&mut self, case: &Case) -> Result<(), EngineError> {
        for stage in case.stages() {
            let snapshot = stage.result_snapshot();
            if snapshot.job.is_submitted() && !snapshot.state.is_finished() {
                if let Err(error) = self.client.stop_job(&snapshot.job.jobid).await {
                    tracing::debug!(
                        stage = %stage.name,
                        jobid = %snapshot.job.jobid,
                        error = %error,
                        "cleanup stop failed"
                    );
                }
            }
        }
        self.persist_jobs().await;
        Ok(())
    }
}

/// Re-derives the final state from a solver message file. The last
/// non-empty line is the diagnostic; lines carrying solver tags are
/// collected as messages. An empty file keeps the coarse state.
fn scan_message_file(content: &str, fallback: StateOptions) -> (StateOptions, Vec<String>) {
    let diag = content.lines().rev().find(|line| !line.trim().is_empty());
    let messages = content
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            line.starts_with("<A>") || line.starts_with("<E>") || line.starts_with("<S>")
        })
        .map(|line| line.trim().to_string())
        .collect();
    match diag {
        Some(diag) => (diagnostic_state_options(diag), messages),
        None => (fallback, messages),
    }
}

async fn move_file(source: &Path, dest: &Path) -> Result<(), EngineError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Rename fails across filesystems; fall back to copy + remove.
    if tokio::fs::rename(source, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(source, dest).await?;
    tokio::fs::remove_file(source).await?;
    Ok(())
}
