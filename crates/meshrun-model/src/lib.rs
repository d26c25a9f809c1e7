//! Data model for meshrun simulation cases.
//!
//! A `Case` is an ordered list of `Stage`s; each stage carries a
//! `RunResult` (state bitmask + backend `Job` record) that the engine
//! crate mutates while a run is in flight.

pub mod case;
pub mod engine;
pub mod job;
pub mod state;

pub use case::*;
pub use engine::*;
pub use job::*;
pub use state::*;
