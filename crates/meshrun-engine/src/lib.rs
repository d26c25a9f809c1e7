//! Execution engine for meshrun.
//!
//! Drives a case's queue of pending results against one of several
//! interchangeable compute backends (local simulator, legacy batch
//! submission tool, cluster job-launcher service), normalizes their
//! state vocabularies into `StateOptions`, and raises case-level
//! lifecycle events through a polling monitor.

pub mod backends;
pub mod errors;
pub mod events;
pub mod factory;
pub mod mesh;
pub mod monitor;
pub mod params;
pub mod queue;
pub mod runner;
pub mod servers;
pub mod translate;

pub use errors::*;
pub use events::*;
pub use factory::*;
pub use mesh::*;
pub use monitor::*;
pub use params::*;
pub use queue::*;
pub use runner::*;
pub use servers::*;
pub use translate::*;
