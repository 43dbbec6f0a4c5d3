//! Lead CSV substitution for csv-entry scenes.

use std::path::Path;

use tracing::debug;

use reelgen_models::Scene;

use crate::error::{WorkerError, WorkerResult};

/// Substitute the URL of every `csv`-entry scene from the lead row.
///
/// Runs immediately after the CSV is fetched and before fingerprinting, so
/// cache keys see the substituted URL. `row_index` is 0-based over data rows
/// (the header row does not count).
pub fn substitute_csv_scenes(
    scenes: &mut [Scene],
    csv_path: &Path,
    row_index: u32,
) -> WorkerResult<()> {
    if !scenes.iter().any(|s| s.needs_csv_substitution()) {
        return Ok(());
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|e| WorkerError::validation(format!("Lead CSV unreadable: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| WorkerError::validation(format!("Lead CSV headers unreadable: {e}")))?
        .clone();

    let record = reader
        .records()
        .nth(row_index as usize)
        .transpose()
        .map_err(|e| WorkerError::validation(format!("Lead CSV row unreadable: {e}")))?
        .ok_or_else(|| {
            WorkerError::validation(format!("Lead row {row_index} not found in CSV"))
        })?;

    for scene in scenes.iter_mut().filter(|s| s.needs_csv_substitution()) {
        let column = scene.csv_column.as_deref().ok_or_else(|| {
            WorkerError::validation(format!("Scene {} has csv entry but no column", scene.id))
        })?;

        let position = headers.iter().position(|h| h == column).ok_or_else(|| {
            WorkerError::validation(format!("Lead CSV has no column '{column}'"))
        })?;

        let value = record.get(position).unwrap_or("").trim();
        if value.is_empty() {
            return Err(WorkerError::validation(format!(
                "Lead row {row_index} has no value in column '{column}'"
            )));
        }

        debug!(scene = %scene.id, column, url = value, "Substituted scene URL from lead CSV");
        scene.url = value.to_string();
    }

    Ok(())
}
