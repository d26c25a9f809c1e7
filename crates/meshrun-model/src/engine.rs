use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects which backend runner/server-information pair the engine
/// crate instantiates. Chosen once at startup; the library takes the
/// value explicitly instead of reading process-wide state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    #[default]
    Simulator,
    Batch,
    Cluster,
}

pub const ENGINE_ENV_VAR: &str = "MESHRUN_ENGINE";

impl Engine {
    /// Reads the engine selection from `MESHRUN_ENGINE`. Unset or
    /// unrecognized values fall back to the simulator.
    pub fn from_env() -> Self {
        std::env::var(ENGINE_ENV_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulator => "simulator",
            Self::Batch => "batch",
            Self::Cluster => "cluster",
        }
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulator" => Ok(Self::Simulator),
            "batch" => Ok(Self::Batch),
            "cluster" => Ok(Self::Cluster),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_engines() {
        for engine in [Engine::Simulator, Engine::Batch, Engine::Cluster] {
            assert_eq!(engine.as_str().parse::<Engine>(), Ok(engine));
        }
        assert!("mystery".parse::<Engine>().is_err());
    }
}
