//! JSON file loading for task input and site partitions.
//!
//! A partition file is a JSON array of rows, each an object mapping column
//! names to numbers, strings or `null`.

use std::fs;
use std::path::Path;

use crate::domain::{SitePartition, TaskInput};
use crate::{FedScoreError, Result};

/// Load and validate a task input file.
///
/// # Errors
/// Returns `Io` if the file cannot be read and `UserInput` if it is not a
/// valid task.
pub fn load_task(path: &Path) -> Result<TaskInput> {
    let json = fs::read_to_string(path)?;
    TaskInput::from_json(&json)
}

/// Load one site's rows.
///
/// # Errors
/// Returns `Io` if the file cannot be read and `UserInput` if it is not an
/// array of row objects.
pub fn load_partition(path: &Path) -> Result<SitePartition> {
    let json = fs::read_to_string(path)?;
    let partition: SitePartition = serde_json::from_str(&json).map_err(|e| {
        FedScoreError::UserInput(format!("{} is not a list of rows: {e}", path.display()))
    })?;
    tracing::debug!(
        "Loaded {} row(s) with {} column(s) from {}",
        partition.len(),
        partition.columns().len(),
        path.display()
    );
    Ok(partition)
}
