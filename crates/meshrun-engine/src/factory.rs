use crate::backends::{BatchBackend, BatchClient, LauncherBackend, LauncherClient, RemoteCopy, SimBackend};
use crate::servers::AlwaysUp;
use crate::{
    CaseRunner, EngineError, EventSink, MeshCache, NoMeshes, NoopConsole, QueueRunner,
    RunnerEvent, ServerConfig, ServerInfos, ServerProbe, SharedConsoleSink,
};
use meshrun_model::{Case, Engine};
use std::sync::Arc;

/// Explicitly constructed dependencies for a runner: the server
/// directory, mesh cache and sinks are shared; backend clients are
/// consumed by the runner they wire up.
pub struct RunnerDeps {
    pub servers: Arc<ServerInfos>,
    pub mesh: Arc<MeshCache>,
    pub console: SharedConsoleSink,
    pub events: EventSink<RunnerEvent>,
    pub batch_client: Option<Box<dyn BatchClient>>,
    pub launcher_client: Option<Box<dyn LauncherClient>>,
    pub remote_copy: Option<Box<dyn RemoteCopy>>,
}

impl Default for RunnerDeps {
    fn default() -> Self {
        Self {
            servers: ServerInfos::shared(vec![ServerConfig::localhost()], Box::new(AlwaysUp)),
            mesh: MeshCache::shared(Box::new(NoMeshes)),
            console: Arc::new(NoopConsole),
            events: EventSink::default(),
            batch_client: None,
            launcher_client: None,
            remote_copy: None,
        }
    }
}

/// Builds the runner for the selected engine. The cluster engine also
/// restores launcher job tracking from the case's persisted blob.
pub async fn runner_factory(
    engine: Engine,
    case: Arc<Case>,
    deps: RunnerDeps,
) -> Result<Box<dyn CaseRunner>, EngineError> {
    match engine {
        Engine::Simulator => Ok(Box::new(
            QueueRunner::new(case, SimBackend::new())
                .events(deps.events)
                .console(deps.console),
        )),
        Engine::Batch => {
            let client = deps
                .batch_client
                .ok_or_else(|| EngineError::backend("batch engine requires a batch client"))?;
            let backend = BatchBackend::new(client, deps.servers, deps.mesh);
            Ok(Box::new(
                QueueRunner::new(case, backend)
                    .events(deps.events)
                    .console(deps.console),
            ))
        }
        Engine::Cluster => {
            let client = deps
                .launcher_client
                .ok_or_else(|| EngineError::backend("cluster engine requires a launcher client"))?;
            let remote = deps
                .remote_copy
                .ok_or_else(|| EngineError::backend("cluster engine requires a remote copy"))?;
            let mut backend =
                LauncherBackend::new(client, remote, deps.servers, deps.mesh, case.clone());
            backend.restore_jobs().await;
            Ok(Box::new(
                QueueRunner::new(case, backend)
                    .events(deps.events)
                    .console(deps.console),
            ))
        }
    }
}

/// Builds the server directory for the selected engine. The simulator
/// always answers with a reachable localhost entry.
pub fn serverinfos_factory(
    engine: Engine,
    configs: Vec<ServerConfig>,
    probe: Box<dyn ServerProbe>,
) -> Arc<ServerInfos> {
    match engine {
        Engine::Simulator => {
            ServerInfos::shared(vec![ServerConfig::localhost()], Box::new(AlwaysUp))
        }
        Engine::Batch | Engine::Cluster => ServerInfos::shared(configs, probe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrun_model::linear_case;

    #[tokio::test(flavor = "current_thread")]
    async fn simulator_runner_needs_no_clients() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1"]));
        let runner = runner_factory(Engine::Simulator, case, RunnerDeps::default()).await;
        assert!(runner.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn batch_runner_without_client_is_rejected() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1"]));
        let error = runner_factory(Engine::Batch, case, RunnerDeps::default())
            .await
            .err();
        assert!(matches!(error, Some(EngineError::Backend(_))));
    }

    #[test]
    fn simulator_serverinfos_always_has_localhost() {
        let infos = serverinfos_factory(Engine::Simulator, Vec::new(), Box::new(AlwaysUp));
        assert!(infos.contains("localhost"));
        assert_eq!(infos.refresh_one("localhost", false), Some(true));
    }
}
