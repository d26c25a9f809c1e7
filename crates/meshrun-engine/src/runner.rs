use crate::{
    EngineError, EventSink, NoopConsole, RunParams, RunQueue, RunSettings, RunnerEvent,
    SharedConsoleSink,
};
use async_trait::async_trait;
use meshrun_model::{Case, Stage, StateOptions};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One backend poll of the current stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollReport {
    /// Normalized state; a terminal value triggers result retrieval
    /// and queue advancement.
    pub state: StateOptions,
    /// New console output since the previous poll.
    pub log_delta: Option<String>,
    /// Diagnostic messages to accumulate on the result.
    pub messages: Vec<String>,
}

/// Backend-specific side of the execution protocol. Implementations
/// translate their backend's vocabulary into `StateOptions` and write
/// `Job` fields on the stage results; all queue semantics live in
/// `QueueRunner`.
#[async_trait]
pub trait RunnerBackend: Send {
    /// Submits `chain` (intermediate ancestors, current stage last)
    /// as one backend job and populates the chain's `Job` records.
    async fn start_current(
        &mut self,
        chain: &[Arc<Stage>],
        settings: &RunSettings,
    ) -> Result<(), EngineError>;

    async fn poll(&mut self, current: &Arc<Stage>) -> Result<PollReport, EngineError>;

    /// Asks the backend to stop the current job. Returns `false` when
    /// there is nothing to stop (already finished).
    async fn stop_current(&mut self, current: &Arc<Stage>) -> Result<bool, EngineError>;

    /// Retrieves result files after a terminal state was observed.
    async fn fetch_results(&mut self, current: &Arc<Stage>) -> Result<(), EngineError>;

    /// Teardown when the case's run history entry is discarded; kills
    /// orphaned backend jobs.
    async fn cleanup(&mut self, case: &Case) -> Result<(), EngineError>;
}

/// Backend-agnostic control surface exposed to the controller.
#[async_trait]
pub trait CaseRunner: Send {
    async fn start(&mut self, params: RunParams) -> Result<(), EngineError>;
    async fn start_next(&mut self) -> Result<(), EngineError>;
    async fn stop(&mut self) -> Result<(), EngineError>;
    async fn refresh(&mut self) -> Result<(), EngineError>;
    async fn result_state(&mut self, stage: &Arc<Stage>) -> Result<StateOptions, EngineError>;
    async fn cleanup(&mut self) -> Result<(), EngineError>;

    async fn pause(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn is_finished(&self) -> bool;
}

/// The single queue-driving runner, generic over the backend.
pub struct QueueRunner<B> {
    case: Arc<Case>,
    backend: B,
    queue: RunQueue,
    settings: Option<RunSettings>,
    started: bool,
    active_chain: Vec<Arc<Stage>>,
    events: EventSink<RunnerEvent>,
    console: SharedConsoleSink,
}

impl<B: RunnerBackend> QueueRunner<B> {
    pub fn new(case: Arc<Case>, backend: B) -> Self {
        let queue = RunQueue::for_case(&case);
        Self {
            case,
            backend,
            queue,
            settings: None,
            started: false,
            active_chain: Vec::new(),
            events: EventSink::default(),
            console: Arc::new(NoopConsole),
        }
    }

    pub fn events(mut self, events: EventSink<RunnerEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn console(mut self, console: SharedConsoleSink) -> Self {
        self.console = console;
        self
    }

    pub fn case(&self) -> &Arc<Case> {
        &self.case
    }

    fn settings(&self) -> Result<&RunSettings, EngineError> {
        self.settings
            .as_ref()
            .ok_or_else(|| EngineError::backend("run parameters not set; call start first"))
    }

    /// Submits the queue head, chaining intermediate stages into one
    /// backend job. An empty queue only logs completion.
    async fn advance(&mut self) -> Result<(), EngineError> {
        loop {
            let Some(head) = self.queue.current().cloned() else {
                tracing::info!(case = %self.case.name, "run queue finished");
                self.events.emit(RunnerEvent::Finished {
                    case: self.case.name.clone(),
                });
                return Ok(());
            };
            if head.is_intermediate() {
                head.with_result(|result| result.state.insert(StateOptions::INTERMEDIATE));
                self.queue.push_interm();
                continue;
            }

            let chain = self.queue.take_chain();
            let settings = self.settings()?.clone();
            match self.backend.start_current(&chain, &settings).await {
                Ok(()) => {
                    let jobid = head.result_snapshot().job.jobid;
                    tracing::info!(
                        case = %self.case.name,
                        stage = %head.name,
                        jobid = %jobid,
                        "stage submitted"
                    );
                    self.events.emit(RunnerEvent::Submitted {
                        case: self.case.name.clone(),
                        stage: head.name.clone(),
                        jobid,
                    });
                    self.active_chain = chain;
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(
                        case = %self.case.name,
                        stage = %head.name,
                        error = %error,
                        "submission failed"
                    );
                    self.fail_current(&head, error.to_string());
                    let _ = self.backend.stop_current(&head).await;
                    return Err(error);
                }
            }
        }
    }

    /// Local half of `stop`: current result goes to `ERROR`, chained
    /// ancestors follow, everything queued behind it back to
    /// `WAITING`.
    fn fail_current(&mut self, current: &Arc<Stage>, reason: String) {
        current.with_result(|result| {
            result.state = result.state.with_primary(StateOptions::ERROR);
            result.job.end_time = Some(now_epoch());
        });
        self.finish_chain(current);
        self.queue.cancel_downstream();
        self.events.emit(RunnerEvent::Failed {
            case: self.case.name.clone(),
            stage: current.name.clone(),
            reason,
        });
    }

    /// Propagates the current stage's terminal state to the chained
    /// ancestors submitted with it, OR'd with `INTERMEDIATE`.
    fn finish_chain(&mut self, current: &Arc<Stage>) {
        let state = current.state();
        for stage in self.active_chain.drain(..) {
            if Arc::ptr_eq(&stage, current) {
                continue;
            }
            stage.with_result(|result| {
                result.state = state | StateOptions::INTERMEDIATE;
                result.job.end_time = Some(now_epoch());
            });
        }
    }

    /// Polls the current stage and cascades over consecutive terminal
    /// transitions within one call (an explicit loop, bounded by the
    /// queue length).
    async fn refresh_inner(&mut self) -> Result<(), EngineError> {
        if !self.started || self.queue.is_finished() {
            return Ok(());
        }
        loop {
            let Some(current) = self.queue.current().cloned() else {
                return Ok(());
            };
            if !current.result_snapshot().job.is_submitted() {
                return Ok(());
            }

            if !current.state().is_finished() {
                let report = self.backend.poll(&current).await?;
                if !report.messages.is_empty() {
                    current.with_result(|result| result.messages.extend(report.messages));
                }
                if !report.state.is_finished() {
                    current.with_result(|result| {
                        result.state = result.state.with_primary(report.state)
                            | report.state.auxiliary();
                    });
                    if let Some(delta) = report.log_delta {
                        if !delta.is_empty() {
                            self.console.append(&delta);
                        }
                    }
                    return Ok(());
                }
                current.with_result(|result| {
                    result.state =
                        result.state.with_primary(report.state) | report.state.auxiliary();
                    result.job.end_time = Some(now_epoch());
                });
                if let Err(error) = self.backend.fetch_results(&current).await {
                    tracing::warn!(
                        case = %self.case.name,
                        stage = %current.name,
                        error = %error,
                        "result retrieval failed"
                    );
                    self.fail_current(&current, error.to_string());
                    return Err(error);
                }
            }

            // Terminal transition of the current stage.
            self.finish_chain(&current);
            let state = current.state();
            if state.contains(StateOptions::ERROR) {
                tracing::info!(
                    case = %self.case.name,
                    stage = %current.name,
                    state = %state,
                    "stage failed, cancelling downstream queue"
                );
                self.fail_current(&current, format!("stage ended in state {state}"));
                return Ok(());
            }

            self.events.emit(RunnerEvent::StageFinished {
                case: self.case.name.clone(),
                stage: current.name.clone(),
                state,
            });
            self.queue.pop_completed();
            self.advance().await?;
            if self.queue.is_empty() {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl<B: RunnerBackend> CaseRunner for QueueRunner<B> {
    async fn start(&mut self, params: RunParams) -> Result<(), EngineError> {
        self.settings = Some(params.validate()?);
        self.started = true;
        self.advance().await
    }

    async fn start_next(&mut self) -> Result<(), EngineError> {
        self.advance().await
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        // Latest state first; a failing poll must not block the stop.
        if let Err(error) = self.refresh_inner().await {
            tracing::debug!(case = %self.case.name, error = %error, "refresh before stop failed");
        }
        let Some(current) = self.queue.current().cloned() else {
            return Ok(());
        };
        let acknowledged = self.backend.stop_current(&current).await?;
        if acknowledged {
            self.fail_current(&current, "stopped by user".to_string());
        }
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), EngineError> {
        self.refresh_inner().await
    }

    async fn result_state(&mut self, stage: &Arc<Stage>) -> Result<StateOptions, EngineError> {
        let cached = stage.state();
        if cached.is_finished() {
            return Ok(cached);
        }
        self.refresh_inner().await?;
        Ok(stage.state())
    }

    async fn cleanup(&mut self) -> Result<(), EngineError> {
        let case = self.case.clone();
        self.backend.cleanup(&case).await
    }

    fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }
}

pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
