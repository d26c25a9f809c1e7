use meshrun_model::{Case, Stage, StateOptions};
use std::collections::VecDeque;
use std::sync::Arc;

/// Ordered execution queue for one case.
///
/// Built by collecting every stage whose result still intersects
/// `NOT_FINISHED | INTERMEDIATE`, in stage order. `interm`
/// accumulates stages chained into the same backend submission as
/// their successor.
#[derive(Debug, Default)]
pub struct RunQueue {
    results: Vec<Arc<Stage>>,
    queue: VecDeque<Arc<Stage>>,
    interm: Vec<Arc<Stage>>,
}

impl RunQueue {
    pub fn for_case(case: &Case) -> Self {
        let results: Vec<Arc<Stage>> = case
            .stages()
            .iter()
            .filter(|stage| {
                stage
                    .state()
                    .intersects(StateOptions::NOT_FINISHED | StateOptions::INTERMEDIATE)
            })
            .cloned()
            .collect();
        let queue = results.iter().cloned().collect();
        Self {
            results,
            queue,
            interm: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<&Arc<Stage>> {
        self.queue.front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.queue.is_empty() || self.results.iter().all(|stage| stage.state().is_finished())
    }

    pub fn results(&self) -> &[Arc<Stage>] {
        &self.results
    }

    /// Moves the queue head onto the intermediate stack (chaining).
    pub fn push_interm(&mut self) -> Option<Arc<Stage>> {
        let stage = self.queue.pop_front()?;
        self.interm.push(stage.clone());
        Some(stage)
    }

    /// The submission chain for the queue head: accumulated
    /// intermediate ancestors followed by the head itself. Clears the
    /// intermediate stack.
    pub fn take_chain(&mut self) -> Vec<Arc<Stage>> {
        let mut chain = std::mem::take(&mut self.interm);
        if let Some(current) = self.queue.front() {
            chain.push(current.clone());
        }
        chain
    }

    pub fn pop_completed(&mut self) -> Option<Arc<Stage>> {
        self.queue.pop_front()
    }

    /// Partial-failure propagation: every queued-but-not-started
    /// result behind the head goes back to `WAITING` and the queue is
    /// emptied. The head (the failed result) keeps its state.
    pub fn cancel_downstream(&mut self) {
        let mut drained = std::mem::take(&mut self.queue).into_iter();
        drained.next();
        for stage in drained {
            stage.with_result(|result| result.state = StateOptions::WAITING);
        }
        self.interm.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrun_model::linear_case;

    #[test]
    fn for_case_skips_already_finished_stages() {
        let case = linear_case("c", "/tmp/c", &["s1", "s2", "s3"]);
        case.stage(0)
            .expect("stage 0")
            .set_state(StateOptions::SUCCESS);

        let queue = RunQueue::for_case(&case);
        assert_eq!(queue.results().len(), 2);
        assert_eq!(queue.current().map(|s| s.name.as_str()), Some("s2"));
    }

    #[test]
    fn cancel_downstream_resets_queued_stages_to_waiting() {
        let case = linear_case("c", "/tmp/c", &["s1", "s2", "s3"]);
        let mut queue = RunQueue::for_case(&case);
        case.stage(0).expect("stage 0").set_state(StateOptions::ERROR);

        queue.cancel_downstream();
        assert!(queue.is_empty());
        assert_eq!(case.stage(0).expect("stage 0").state(), StateOptions::ERROR);
        assert_eq!(
            case.stage(1).expect("stage 1").state(),
            StateOptions::WAITING
        );
        assert_eq!(
            case.stage(2).expect("stage 2").state(),
            StateOptions::WAITING
        );
    }

    #[test]
    fn take_chain_returns_interm_ancestors_then_head() {
        let case = linear_case("c", "/tmp/c", &["s1", "s2", "s3"]);
        let mut queue = RunQueue::for_case(&case);
        queue.push_interm();
        queue.push_interm();

        let chain: Vec<String> = queue
            .take_chain()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(chain, vec!["s1", "s2", "s3"]);
        assert_eq!(queue.current().map(|s| s.name.as_str()), Some("s3"));
    }
}
