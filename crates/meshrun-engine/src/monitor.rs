use crate::{EventSink, MonitorEvent};
use meshrun_model::{Case, Engine, Stage, StateOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const SIMULATOR_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Answers the current state of a stage, typically by consulting the
/// runner that owns its live result. `None` falls back to the stage's
/// cached state.
pub trait StageWatcher: Send + Sync {
    fn state_of(&self, stage: &Stage) -> Option<StateOptions>;
}

/// Watcher that always defers to the cached state.
#[derive(Default)]
pub struct CachedStates;

impl StageWatcher for CachedStates {
    fn state_of(&self, _stage: &Stage) -> Option<StateOptions> {
        None
    }
}

struct TrackedCase {
    case: Arc<Case>,
    was_running: bool,
    last_states: HashMap<String, StateOptions>,
}

/// Polling scheduler: computes per-case state histograms on a timer,
/// detects completion transitions and raises case-level lifecycle
/// events. Reads result state only; never mutates it.
pub struct Monitor {
    interval: Duration,
    watcher: Arc<dyn StageWatcher>,
    events: EventSink<MonitorEvent>,
    tracked: Vec<TrackedCase>,
    active: bool,
}

impl Monitor {
    pub fn new(watcher: Arc<dyn StageWatcher>, events: EventSink<MonitorEvent>) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            watcher,
            events,
            tracked: Vec::new(),
            active: false,
        }
    }

    /// Picks the poll interval for the selected engine: the local
    /// simulator turns jobs around fast enough to warrant 1s.
    pub fn for_engine(mut self, engine: Engine) -> Self {
        self.interval = match engine {
            Engine::Simulator => SIMULATOR_POLL_INTERVAL,
            Engine::Batch | Engine::Cluster => DEFAULT_POLL_INTERVAL,
        };
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn track(&mut self, case: Arc<Case>) {
        if self
            .tracked
            .iter()
            .any(|tracked| Arc::ptr_eq(&tracked.case, &case))
        {
            return;
        }
        self.tracked.push(TrackedCase {
            case,
            // A case enters tracking as running so that even a run
            // finishing between two polls yields one completion event.
            was_running: true,
            last_states: HashMap::new(),
        });
        if !self.active {
            self.active = true;
            self.events.emit(MonitorEvent::Started);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.events.emit(MonitorEvent::Stopped);
        }
    }

    /// One polling pass over all tracked cases. Public so tests and
    /// cooperative controllers can drive the monitor deterministically.
    pub fn tick(&mut self) {
        if !self.active {
            return;
        }
        let watcher = Arc::clone(&self.watcher);
        let mut completed = Vec::new();
        let mut changed = Vec::new();
        let mut any_running = false;

        for tracked in &mut self.tracked {
            let histogram = case_histogram(&tracked.case, watcher.as_ref());
            for (stage_name, state) in &histogram {
                if tracked.last_states.get(stage_name) != Some(state) {
                    tracked.last_states.insert(stage_name.clone(), *state);
                    changed.push(MonitorEvent::StageChanged {
                        case: tracked.case.name.clone(),
                        stage: stage_name.clone(),
                        state: *state,
                    });
                }
            }
            let running = histogram
                .iter()
                .any(|(_, state)| state.intersects(StateOptions::RUNNING | StateOptions::PAUSING));
            if tracked.was_running && !running {
                completed.push(tracked.case.name.clone());
            }
            tracked.was_running = running;
            any_running |= running;
        }

        for event in changed {
            self.events.emit(event);
        }
        for case in &completed {
            self.events.emit(MonitorEvent::CaseCompleted { case: case.clone() });
        }
        self.tracked
            .retain(|tracked| !completed.contains(&tracked.case.name));

        if !any_running && self.tracked.is_empty() {
            self.events.emit(MonitorEvent::Finished);
            self.stop();
        }
    }

    /// Drives `tick` on a repeating timer until no tracked case is
    /// running.
    pub async fn run(&mut self) {
        let mut timer = tokio::time::interval(self.interval);
        while self.active {
            timer.tick().await;
            self.tick();
        }
    }
}

/// The displayed states of every stage of a case, in stage order. An
/// unfinished intermediate stage tracks the downstream stage that
/// owns the live result, OR'd with the `INTERMEDIATE` flag.
fn case_histogram(case: &Case, watcher: &dyn StageWatcher) -> Vec<(String, StateOptions)> {
    case.stages()
        .iter()
        .map(|stage| {
            let mut state = watcher.state_of(stage).unwrap_or_else(|| stage.state());
            if stage.is_intermediate() && !state.is_finished() {
                if let Some(owner) = case.downstream_owner(stage.number) {
                    state = watcher.state_of(owner).unwrap_or_else(|| owner.state())
                        | StateOptions::INTERMEDIATE;
                }
            }
            (stage.name.clone(), state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_channel;
    use meshrun_model::linear_case;

    fn drain(rx: &mut crate::EventReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn stage_change_events_are_edge_triggered() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1"]));
        case.stage(0)
            .expect("stage 0")
            .set_state(StateOptions::RUNNING);
        let (tx, mut rx) = event_channel();
        let mut monitor = Monitor::new(Arc::new(CachedStates), EventSink::with_sender(tx));
        monitor.track(case.clone());

        monitor.tick();
        monitor.tick();
        let changes = drain(&mut rx)
            .into_iter()
            .filter(|event| matches!(event, MonitorEvent::StageChanged { .. }))
            .count();
        // The state never changed after the first observation.
        assert_eq!(changes, 1);
    }

    #[test]
    fn completed_case_is_reported_once_and_untracked() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1"]));
        case.stage(0)
            .expect("stage 0")
            .set_state(StateOptions::SUCCESS);
        let (tx, mut rx) = event_channel();
        let mut monitor = Monitor::new(Arc::new(CachedStates), EventSink::with_sender(tx));
        monitor.track(case);

        monitor.tick();
        monitor.tick();

        let events = drain(&mut rx);
        let completed = events
            .iter()
            .filter(|event| matches!(event, MonitorEvent::CaseCompleted { .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(events.contains(&MonitorEvent::Finished));
        assert!(events.contains(&MonitorEvent::Stopped));
        assert!(!monitor.is_active());
    }

    #[test]
    fn running_case_keeps_the_monitor_active() {
        let case = Arc::new(linear_case("c", "/tmp/c", &["s1", "s2"]));
        case.stage(0)
            .expect("stage 0")
            .set_state(StateOptions::RUNNING);
        let (tx, mut rx) = event_channel();
        let mut monitor = Monitor::new(Arc::new(CachedStates), EventSink::with_sender(tx));
        monitor.track(case);

        monitor.tick();
        assert!(monitor.is_active());
        assert!(
            !drain(&mut rx)
                .iter()
                .any(|event| matches!(event, MonitorEvent::CaseCompleted { .. }))
        );
    }

    #[test]
    fn intermediate_stage_tracks_downstream_owner_state() {
        use meshrun_model::{Case, Stage};
        let stages = vec![
            Arc::new(Stage::new("s1", 0, "/tmp/c/s1").with_intermediate(true)),
            Arc::new(Stage::new("s2", 1, "/tmp/c/s2")),
        ];
        let case = Arc::new(Case::new("c", "/tmp/c", stages));
        case.stage(1)
            .expect("stage 1")
            .set_state(StateOptions::RUNNING);

        let (tx, mut rx) = event_channel();
        let mut monitor = Monitor::new(Arc::new(CachedStates), EventSink::with_sender(tx));
        monitor.track(case);
        monitor.tick();

        let events = drain(&mut rx);
        let s1_state = events.iter().find_map(|event| match event {
            MonitorEvent::StageChanged { stage, state, .. } if stage == "s1" => Some(*state),
            _ => None,
        });
        assert_eq!(
            s1_state,
            Some(StateOptions::RUNNING | StateOptions::INTERMEDIATE)
        );
    }

    #[test]
    fn finished_intermediate_stage_keeps_its_own_state() {
        use meshrun_model::{Case, Stage};
        let stages = vec![
            Arc::new(Stage::new("s1", 0, "/tmp/c/s1").with_intermediate(true)),
            Arc::new(Stage::new("s2", 1, "/tmp/c/s2")),
        ];
        let case = Arc::new(Case::new("c", "/tmp/c", stages));
        case.stage(0)
            .expect("stage 0")
            .set_state(StateOptions::SUCCESS | StateOptions::INTERMEDIATE);
        case.stage(1)
            .expect("stage 1")
            .set_state(StateOptions::RUNNING);

        let histogram = case_histogram(
            case.as_ref(),
            &CachedStates,
        );
        assert_eq!(
            histogram[0].1,
            StateOptions::SUCCESS | StateOptions::INTERMEDIATE
        );
    }
}
