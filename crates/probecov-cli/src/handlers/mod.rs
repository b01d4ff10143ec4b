//! Subcommand handlers

pub mod analyze;
pub mod info;
pub mod instrument;
pub mod merge;

use crate::error::{CliError, CliResult};
use std::path::PathBuf;

/// Expand glob patterns; a pattern matching nothing is kept as a literal path
pub fn expand_patterns(patterns: &[String]) -> CliResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let before = paths.len();
        for entry in glob::glob(pattern)? {
            paths.push(entry.map_err(|e| CliError::Io(e.into_error()))?);
        }
        if paths.len() == before {
            paths.push(PathBuf::from(pattern));
        }
    }
    Ok(paths)
}
