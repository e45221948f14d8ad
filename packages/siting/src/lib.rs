#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Wind turbine admissibility engine.
//!
//! Two stages run per region:
//!
//! 1. [`pipeline::AdmissibilityPipeline`] classifies every allowable-landuse
//!    node by its distance to the nearest restricting node, first against
//!    its own region and then against its neighbours, and persists a
//!    verdict per node.
//! 2. [`aggregate::AreaAggregator`] groups the buildable nodes by way,
//!    computes hull areas and installable power for each configured
//!    threshold pair, and persists one summary per pair.
//!
//! Storage is abstracted behind [`store::LandStore`]; the runner in
//! [`runner`] drives many regions concurrently.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod neighbours;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod store;

pub use aggregate::{AggregateReport, AreaAggregator};
pub use classify::Classifier;
pub use config::{ConfigError, SitingConfig};
pub use pipeline::{AdmissibilityPipeline, RegionReport};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use runner::{RegionJob, RegionOutcome, RunSummary, run_regions};
pub use store::{LandStore, MemoryStore, StoreError};

/// Errors that can occur while evaluating or aggregating a region.
#[derive(Debug, thiserror::Error)]
pub enum SitingError {
    /// Storage request failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
