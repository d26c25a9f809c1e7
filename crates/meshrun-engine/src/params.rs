use crate::EngineError;
use meshrun_model::ExecMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Run parameters supplied by the controller. `server`, `version`,
/// `mode`, `memory` and `time` are required; `validate` reports every
/// missing key at once.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub server: Option<String>,
    pub version: Option<String>,
    pub mode: Option<ExecMode>,
    pub memory_mb: Option<u64>,
    pub time_limit_s: Option<u64>,
    pub nodes: Option<u32>,
    pub cpus: Option<u32>,
    pub threads: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// `RunParams` after validation, with the required fields unwrapped.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSettings {
    pub server: String,
    pub version: String,
    pub mode: ExecMode,
    pub memory_mb: u64,
    pub time_limit_s: u64,
    pub nodes: Option<u32>,
    pub cpus: Option<u32>,
    pub threads: Option<u32>,
    pub description: String,
    pub extra: BTreeMap<String, Value>,
}

impl RunParams {
    pub fn validate(self) -> Result<RunSettings, EngineError> {
        let mut missing = Vec::new();
        if self.server.is_none() {
            missing.push("server".to_string());
        }
        if self.version.is_none() {
            missing.push("version".to_string());
        }
        if self.mode.is_none() {
            missing.push("mode".to_string());
        }
        if self.memory_mb.is_none() {
            missing.push("memory".to_string());
        }
        if self.time_limit_s.is_none() {
            missing.push("time".to_string());
        }
        if !missing.is_empty() {
            return Err(EngineError::Configuration { missing });
        }

        Ok(RunSettings {
            server: self.server.unwrap_or_default(),
            version: self.version.unwrap_or_default(),
            mode: self.mode.unwrap_or_default(),
            memory_mb: self.memory_mb.unwrap_or_default(),
            time_limit_s: self.time_limit_s.unwrap_or_default(),
            nodes: self.nodes,
            cpus: self.cpus,
            threads: self.threads,
            description: self.description,
            extra: self.extra,
        })
    }
}

impl RunSettings {
    /// A fully-populated settings value for tests and demos.
    pub fn localhost() -> Self {
        Self {
            server: "localhost".to_string(),
            version: "stable".to_string(),
            mode: ExecMode::Batch,
            memory_mb: 2048,
            time_limit_s: 3600,
            nodes: None,
            cpus: None,
            threads: None,
            description: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reports_every_missing_key() {
        let error = RunParams {
            server: Some("localhost".to_string()),
            memory_mb: Some(2048),
            ..RunParams::default()
        }
        .validate()
        .expect_err("incomplete params should fail");

        let EngineError::Configuration { missing } = error else {
            panic!("expected a configuration error");
        };
        assert_eq!(missing, vec!["version", "mode", "time"]);
    }

    #[test]
    fn validate_passes_through_complete_params() {
        let settings = RunParams {
            server: Some("cluster1".to_string()),
            version: Some("16.4".to_string()),
            mode: Some(ExecMode::Interactive),
            memory_mb: Some(8192),
            time_limit_s: Some(600),
            threads: Some(4),
            ..RunParams::default()
        }
        .validate()
        .expect("complete params should validate");

        assert_eq!(settings.server, "cluster1");
        assert_eq!(settings.mode, ExecMode::Interactive);
        assert_eq!(settings.threads, Some(4));
    }
}
