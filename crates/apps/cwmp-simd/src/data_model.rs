use std::fs;
use std::path::Path;

use cwmp_sim::{ParameterStore, SimulatorError};

/// Minimal TR-181 tree used when no data model file is configured.
pub const BUNDLED: &str = include_str!("../data/tr181-minimal.json");

#[derive(Debug, thiserror::Error)]
pub enum DataModelError {
    #[error("read {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error(transparent)]
    Invalid(#[from] SimulatorError),
}

/// Each device gets its own copy of the tree.
pub fn load(path: Option<&Path>) -> Result<ParameterStore, DataModelError> {
    let text = match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|source| DataModelError::Read { path: path.display().to_string(), source })?,
        None => BUNDLED.to_string(),
    };
    Ok(ParameterStore::from_json(&text)?)
}
