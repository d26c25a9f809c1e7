use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask vocabulary unifying backend-specific job states and
/// diagnostics.
///
/// Exactly one primary flag (one of `NOT_FINISHED` or one of
/// `FINISHED`) is set at a time; auxiliary flags (`WARN`, `NOOK`,
/// `CPU_LIMIT`, `MEMORY`, `NO_CONVERGENCE`, `INTERMEDIATE`) may be
/// OR'd on top.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateOptions(u32);

impl StateOptions {
    pub const WAITING: Self = Self(1 << 0);
    pub const PENDING: Self = Self(1 << 1);
    pub const RUNNING: Self = Self(1 << 2);
    pub const PAUSING: Self = Self(1 << 3);
    pub const SUCCESS: Self = Self(1 << 4);
    pub const ERROR: Self = Self(1 << 5);
    pub const INTERRUPTED: Self = Self(1 << 6);
    pub const WARN: Self = Self(1 << 7);
    pub const NOOK: Self = Self(1 << 8);
    pub const CPU_LIMIT: Self = Self(1 << 9);
    pub const MEMORY: Self = Self(1 << 10);
    pub const NO_CONVERGENCE: Self = Self(1 << 11);
    pub const INTERMEDIATE: Self = Self(1 << 12);

    pub const FINISHED: Self = Self(Self::SUCCESS.0 | Self::ERROR.0 | Self::INTERRUPTED.0);
    pub const NOT_FINISHED: Self =
        Self(Self::WAITING.0 | Self::PENDING.0 | Self::RUNNING.0 | Self::PAUSING.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// The primary (lifecycle) portion of the mask.
    pub const fn primary(self) -> Self {
        Self(self.0 & (Self::FINISHED.0 | Self::NOT_FINISHED.0))
    }

    /// The auxiliary flags OR'd on top of the primary state.
    pub const fn auxiliary(self) -> Self {
        Self(self.0 & !(Self::FINISHED.0 | Self::NOT_FINISHED.0))
    }

    /// Replaces the primary state, keeping auxiliary flags.
    #[must_use]
    pub const fn with_primary(self, primary: Self) -> Self {
        Self(self.auxiliary().0 | primary.primary().0)
    }

    pub const fn is_finished(self) -> bool {
        self.intersects(Self::FINISHED)
    }

    pub const fn is_not_finished(self) -> bool {
        self.intersects(Self::NOT_FINISHED)
    }
}

impl BitOr for StateOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StateOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const FLAG_NAMES: &[(StateOptions, &str)] = &[
    (StateOptions::WAITING, "waiting"),
    (StateOptions::PENDING, "pending"),
    (StateOptions::RUNNING, "running"),
    (StateOptions::PAUSING, "pausing"),
    (StateOptions::SUCCESS, "success"),
    (StateOptions::ERROR, "error"),
    (StateOptions::INTERRUPTED, "interrupted"),
    (StateOptions::WARN, "warn"),
    (StateOptions::NOOK, "nook"),
    (StateOptions::CPU_LIMIT, "cpu_limit"),
    (StateOptions::MEMORY, "memory"),
    (StateOptions::NO_CONVERGENCE, "no_convergence"),
    (StateOptions::INTERMEDIATE, "intermediate"),
];

impl fmt::Display for StateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in FLAG_NAMES {
            if self.contains(*flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_primary_replaces_lifecycle_keeps_auxiliary() {
        let state = StateOptions::RUNNING | StateOptions::WARN;
        let finished = state.with_primary(StateOptions::SUCCESS);

        assert!(finished.contains(StateOptions::SUCCESS));
        assert!(finished.contains(StateOptions::WARN));
        assert!(!finished.intersects(StateOptions::NOT_FINISHED));
    }

    #[test]
    fn finished_composite_matches_terminal_flags() {
        for terminal in [
            StateOptions::SUCCESS,
            StateOptions::ERROR,
            StateOptions::INTERRUPTED,
        ] {
            assert!(terminal.is_finished());
            assert!(!terminal.is_not_finished());
        }
        for live in [
            StateOptions::WAITING,
            StateOptions::PENDING,
            StateOptions::RUNNING,
            StateOptions::PAUSING,
        ] {
            assert!(live.is_not_finished());
            assert!(!live.is_finished());
        }
    }

    #[test]
    fn display_lists_flag_names() {
        let state = StateOptions::SUCCESS | StateOptions::WARN | StateOptions::NOOK;
        assert_eq!(state.to_string(), "success|warn|nook");
        assert_eq!(StateOptions::empty().to_string(), "none");
    }
}
