use crate::{Job, StateOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Direction flags for a stage data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAttr {
    In,
    Out,
    InOut,
}

impl FileAttr {
    pub fn is_in(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    pub fn is_out(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

/// One data/result file attached to a stage via a numeric handle.
///
/// `reference` holds an opaque mesh-object reference when the input
/// is not a plain path; the engine resolves it on demand through its
/// mesh cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: PathBuf,
    pub attr: FileAttr,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FileInfo {
    pub fn input(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            attr: FileAttr::In,
            exists: true,
            reference: None,
        }
    }

    pub fn output(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            attr: FileAttr::Out,
            exists: false,
            reference: None,
        }
    }
}

/// Execution record attached 1:1 to a stage. Mutated exclusively by
/// the active runner; never destroyed during a run, only reset on
/// re-run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunResult {
    pub state: StateOptions,
    pub job: Job,
    pub messages: Vec<String>,
    /// Set when the result database lives on a remote host and must
    /// be fetched through the remote-copy primitive.
    pub has_remote: bool,
}

impl RunResult {
    pub fn waiting() -> Self {
        Self {
            state: StateOptions::WAITING,
            ..Self::default()
        }
    }
}

/// One unit of simulation work within a case.
#[derive(Debug)]
pub struct Stage {
    pub name: String,
    /// Position within the parent case, starting at zero.
    pub number: usize,
    pub folder: PathBuf,
    pub database_path: PathBuf,
    pub files: BTreeMap<u16, FileInfo>,
    intermediate: bool,
    result: Mutex<RunResult>,
}

impl Stage {
    pub fn new(name: impl Into<String>, number: usize, folder: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let folder = folder.into();
        let database_path = folder.join(format!("{name}.base"));
        Self {
            name,
            number,
            folder,
            database_path,
            files: BTreeMap::new(),
            intermediate: false,
            result: Mutex::new(RunResult::waiting()),
        }
    }

    pub fn with_files(mut self, files: BTreeMap<u16, FileInfo>) -> Self {
        self.files = files;
        self
    }

    /// Marks this stage as chained into the same backend submission
    /// as its successor (its own result is not persisted).
    pub fn with_intermediate(mut self, intermediate: bool) -> Self {
        self.intermediate = intermediate;
        self
    }

    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    pub fn state(&self) -> StateOptions {
        self.lock_result().state
    }

    pub fn set_state(&self, state: StateOptions) {
        self.lock_result().state = state;
    }

    /// Runs `f` with exclusive access to the result record.
    pub fn with_result<R>(&self, f: impl FnOnce(&mut RunResult) -> R) -> R {
        f(&mut self.lock_result())
    }

    pub fn result_snapshot(&self) -> RunResult {
        self.lock_result().clone()
    }

    /// Resets the result for a re-run; the record itself survives.
    pub fn reset_result(&self) {
        *self.lock_result() = RunResult::waiting();
    }

    fn lock_result(&self) -> std::sync::MutexGuard<'_, RunResult> {
        // A poisoned lock only means a writer panicked mid-update;
        // the record stays usable.
        self.result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An ordered set of stages representing one runnable simulation
/// configuration.
#[derive(Debug)]
pub struct Case {
    pub name: String,
    pub folder: PathBuf,
    stages: Vec<Arc<Stage>>,
    /// Opaque serialized job-list blob owned by the cluster launcher;
    /// enables job tracking across restarts.
    jobs_list: RwLock<Option<Vec<u8>>>,
}

impl Case {
    pub fn new(
        name: impl Into<String>,
        folder: impl Into<PathBuf>,
        stages: Vec<Arc<Stage>>,
    ) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
            stages,
            jobs_list: RwLock::new(None),
        }
    }

    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    pub fn stage(&self, number: usize) -> Option<&Arc<Stage>> {
        self.stages.get(number)
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Arc<Stage>> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// The first non-intermediate stage at or after `number`: the
    /// stage whose live result an unfinished chained stage tracks.
    pub fn downstream_owner(&self, number: usize) -> Option<&Arc<Stage>> {
        self.stages
            .get(number..)?
            .iter()
            .find(|stage| !stage.is_intermediate())
    }

    pub fn jobs_list(&self) -> Option<Vec<u8>> {
        self.jobs_list
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_jobs_list(&self, blob: Option<Vec<u8>>) {
        *self
            .jobs_list
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = blob;
    }
}

/// Serializable description of a case, used by front ends to build a
/// `Case` from a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseSpec {
    pub name: String,
    #[serde(default)]
    pub folder: PathBuf,
    pub stages: Vec<StageSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub intermediate: bool,
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

impl CaseSpec {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn build(&self) -> Case {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(number, spec)| {
                let files = spec
                    .files
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(handle, file)| (handle as u16, file))
                    .collect();
                Arc::new(
                    Stage::new(&spec.name, number, self.folder.join(&spec.name))
                        .with_files(files)
                        .with_intermediate(spec.intermediate),
                )
            })
            .collect();
        Case::new(&self.name, &self.folder, stages)
    }
}

/// Builds a plain linear case with `names.len()` stages under
/// `folder`, none of them intermediate.
pub fn linear_case(name: &str, folder: impl AsRef<Path>, names: &[&str]) -> Case {
    let folder = folder.as_ref();
    let stages = names
        .iter()
        .enumerate()
        .map(|(number, stage_name)| {
            Arc::new(Stage::new(*stage_name, number, folder.join(stage_name)))
        })
        .collect();
    Case::new(name, folder, stages)
}
