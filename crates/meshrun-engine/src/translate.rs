//! Pure translators from backend state/diagnostic vocabularies to
//! `StateOptions`.
//!
//! Primary-state translators are consulted first; an empty return
//! means "ask the diagnostic parser instead" (`resolve_state`).

use meshrun_model::StateOptions;

/// Batch-tool scheduler states. Anything the scheduler does not
/// report as queued or running is left to the diagnostic.
pub fn batch_state_options(state: &str) -> StateOptions {
    match state.trim() {
        "PEND" | "SUSPENDED" => StateOptions::PENDING,
        "RUN" => StateOptions::RUNNING,
        _ => StateOptions::empty(),
    }
}

/// Cluster-launcher coarse states. Terminal launcher states resolve
/// to a final state only when `full` is requested; otherwise the
/// caller is expected to re-derive the outcome from the message file.
pub fn launcher_state_options(state: &str, full: bool) -> StateOptions {
    match state.trim() {
        "RUNNING" => StateOptions::RUNNING,
        "PAUSED" => StateOptions::PENDING,
        "FINISHED" if full => StateOptions::SUCCESS,
        "FAILED" if full => StateOptions::ERROR,
        _ => StateOptions::PENDING,
    }
}

/// Solver diagnostic strings. The base outcome comes from the `OK` /
/// `<A>` / `<S>` convention; auxiliary flags are OR'd independently.
pub fn diagnostic_state_options(diag: &str) -> StateOptions {
    let diag = diag.trim();
    let mut state = if diag == "OK" {
        StateOptions::SUCCESS
    } else if diag.starts_with("<A>") {
        StateOptions::SUCCESS | StateOptions::WARN
    } else if diag.contains("<S>") {
        StateOptions::INTERRUPTED
    } else {
        StateOptions::ERROR
    };

    if diag.contains("NOOK") || diag.contains("TEST_RESU") {
        state |= StateOptions::NOOK;
    }
    // Mutually exclusive, checked in priority order.
    if diag.contains("CPU_LIMIT") {
        state |= StateOptions::CPU_LIMIT;
    } else if diag.contains("MEMORY") {
        state |= StateOptions::MEMORY;
    } else if diag.contains("NO_CONVERGENCE") {
        state |= StateOptions::NO_CONVERGENCE;
    }

    state
}

/// Composition rule: a determined primary state wins; an empty one
/// defers to the diagnostic parser.
pub fn resolve_state(primary: StateOptions, diag: &str) -> StateOptions {
    if primary.is_empty() {
        diagnostic_state_options(diag)
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_states_map_to_pending_or_running() {
        assert_eq!(batch_state_options("PEND"), StateOptions::PENDING);
        assert_eq!(batch_state_options("SUSPENDED"), StateOptions::PENDING);
        assert_eq!(batch_state_options("RUN"), StateOptions::RUNNING);
        assert_eq!(batch_state_options("ENDED"), StateOptions::empty());
    }

    #[test]
    fn launcher_terminal_states_require_full() {
        assert_eq!(
            launcher_state_options("RUNNING", false),
            StateOptions::RUNNING
        );
        assert_eq!(
            launcher_state_options("PAUSED", false),
            StateOptions::PENDING
        );
        assert_eq!(
            launcher_state_options("FINISHED", false),
            StateOptions::PENDING
        );
        assert_eq!(
            launcher_state_options("FINISHED", true),
            StateOptions::SUCCESS
        );
        assert_eq!(launcher_state_options("FAILED", true), StateOptions::ERROR);
        assert_eq!(
            launcher_state_options("CREATED", true),
            StateOptions::PENDING
        );
    }

    #[test]
    fn diagnostic_ok_is_plain_success() {
        let state = diagnostic_state_options("OK");
        assert!(state.contains(StateOptions::SUCCESS));
        assert!(!state.intersects(StateOptions::ERROR | StateOptions::INTERRUPTED));
        assert!(!state.contains(StateOptions::WARN));
    }

    #[test]
    fn diagnostic_alarm_prefix_adds_warn() {
        let state = diagnostic_state_options("<A>_WARN");
        assert!(state.contains(StateOptions::SUCCESS | StateOptions::WARN));
    }

    #[test]
    fn diagnostic_signal_is_interrupted() {
        let state = diagnostic_state_options("<S>_SIGNAL");
        assert!(state.contains(StateOptions::INTERRUPTED));
        assert!(!state.intersects(StateOptions::SUCCESS | StateOptions::ERROR));
    }

    #[test]
    fn diagnostic_nook_flag_is_independent_of_base_outcome() {
        assert!(diagnostic_state_options("NOOK found").contains(StateOptions::NOOK));
        assert!(diagnostic_state_options("<A>_TEST_RESU").contains(StateOptions::NOOK));
        assert!(
            diagnostic_state_options("<A>_TEST_RESU")
                .contains(StateOptions::SUCCESS | StateOptions::WARN)
        );
    }

    #[test]
    fn diagnostic_resource_flags_are_mutually_exclusive() {
        let cpu = diagnostic_state_options("<S>_CPU_LIMIT_MEMORY");
        assert!(cpu.contains(StateOptions::CPU_LIMIT));
        assert!(!cpu.contains(StateOptions::MEMORY));

        let memory = diagnostic_state_options("ERROR_MEMORY");
        assert!(memory.contains(StateOptions::MEMORY));

        let convergence = diagnostic_state_options("NO_CONVERGENCE");
        assert!(convergence.contains(StateOptions::NO_CONVERGENCE));
        assert!(convergence.contains(StateOptions::ERROR));
    }

    #[test]
    fn resolve_state_prefers_determined_primary() {
        assert_eq!(
            resolve_state(StateOptions::RUNNING, "OK"),
            StateOptions::RUNNING
        );
        assert!(
            resolve_state(StateOptions::empty(), "OK").contains(StateOptions::SUCCESS)
        );
    }
}
