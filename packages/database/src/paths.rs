#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the `DuckDB` data directory.

use std::path::{Path, PathBuf};

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "WIND_SITING_DB";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// crate directory itself if it has no grandparent.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .unwrap_or(manifest_dir)
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the default siting `DuckDB` file path.
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("wind_siting.duckdb")
}

/// Resolves the database path: explicit argument, then
/// [`DB_PATH_ENV`], then [`default_db_path`].
#[must_use]
pub fn resolve_db_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            std::env::var_os(DB_PATH_ENV)
                .filter(|value| !value.is_empty())
                .map_or_else(default_db_path, PathBuf::from)
        },
        Path::to_path_buf,
    )
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
