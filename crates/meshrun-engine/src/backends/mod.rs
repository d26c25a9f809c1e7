//! Concrete runner backends: the in-process simulator, the legacy
//! batch submission tool, and the cluster job-launcher service.

pub mod batch;
pub mod launcher;
pub mod sim;

pub use batch::{BatchBackend, BatchClient, JobProfile, ProfileEntry, TAIL_LINES};
pub use launcher::{
    JobDescriptor, JobParameters, LauncherBackend, LauncherClient, RemoteCopy,
};
pub use sim::SimBackend;
