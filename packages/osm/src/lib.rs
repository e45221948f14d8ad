#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Import parsers for OpenStreetMap land-use extracts and region lists.
//!
//! Region files are plain text: one administrative region name per line,
//! and one `Name - Neighbour A; Neighbour B;` line per region for
//! adjacency. Land-use data comes as one Overpass JSON extract per region.

pub mod overpass;
pub mod regions;

pub use overpass::{RegionExtract, parse_overpass, read_overpass_file};
pub use regions::{RegionRecord, parse_neighbour_list, parse_region_list};

/// Errors that can occur while reading import files.
#[derive(Debug, thiserror::Error)]
pub enum OsmError {
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file could not be parsed.
    #[error("Parse error in {path}: {message}")]
    Parse {
        /// File being parsed.
        path: String,
        /// Description of what went wrong.
        message: String,
    },
}
