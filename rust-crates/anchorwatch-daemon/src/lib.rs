//! anchorwatch daemon library
//!
//! This module re-exports the daemon's modules for integration testing.

pub mod config;
pub mod fault;
pub mod pipeline;
pub mod supervisor;

pub use config::{BaselineConfig, DaemonConfig, PipelineSettings};
pub use fault::CycleError;
pub use pipeline::{Clock, CycleOutcome, Pipeline};
pub use supervisor::{AnchorOpener, Supervisor};
