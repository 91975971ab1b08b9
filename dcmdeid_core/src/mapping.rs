//! Durable persistence of the pseudonym mapping and day-shift artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::DeidError;

/// Name of the pseudonym mapping artifact written to the output root.
pub const MAPPING_FILENAME: &str = "mapper.json";

/// Name of the day-shift artifact written to the output root.
pub const DAY_SHIFTS_FILENAME: &str = "day_shifts.json";

/// Accumulates the identity allocations of finished patients and writes them
/// out exactly once at the end of the run.
///
/// When any per-patient override markers were consumed during the run the
/// persisted mapping table contains only the override allocations, keyed by
/// the assigned override id with the patient folder's numeric suffix as the
/// value. Otherwise it maps each pseudonym to the original patient key.
///
#[derive(Debug, Default)]
pub struct MappingWriter {
  pseudonyms: BTreeMap<String, String>,
  overrides: BTreeMap<String, String>,
  day_shifts: BTreeMap<String, i64>,
}

impl MappingWriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records a finished patient's pseudonym and original key.
  ///
  pub fn record_patient(&mut self, pseudonym: &str, original_key: &str) {
    self
      .pseudonyms
      .insert(pseudonym.to_string(), original_key.to_string());
  }

  /// Records a finished patient whose pseudonym came from an override
  /// marker.
  ///
  pub fn record_override(&mut self, override_id: &str, original_suffix: &str) {
    self
      .overrides
      .insert(override_id.to_string(), original_suffix.to_string());
  }

  /// Records a finished patient's day offset.
  ///
  pub fn record_offset(&mut self, pseudonym: &str, offset_days: i64) {
    self.day_shifts.insert(pseudonym.to_string(), offset_days);
  }

  /// Writes both artifacts into the output directory. Each file is written
  /// to a temporary name and renamed into place so an interrupted run never
  /// leaves a partially written artifact behind.
  ///
  pub fn finalize(&self, output_directory: &Path) -> Result<(), DeidError> {
    let table = if self.overrides.is_empty() {
      &self.pseudonyms
    } else {
      &self.overrides
    };

    write_json_atomically(&output_directory.join(MAPPING_FILENAME), table)?;
    write_json_atomically(
      &output_directory.join(DAY_SHIFTS_FILENAME),
      &self.day_shifts,
    )
  }
}

fn write_json_atomically<T: serde::Serialize>(
  path: &PathBuf,
  value: &T,
) -> Result<(), DeidError> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| DeidError::FileError {
      when: format!("serializing \"{}\"", path.display()),
      details: e.to_string(),
    })?;

  // Append a random suffix to get a unique name for a temporary output file
  let mut rng = rand::thread_rng();
  let random_suffix: String = (0..16)
    .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
    .collect();

  let tmp_path =
    crate::utils::path_with_suffix(path, &format!(".{random_suffix}.tmp"));

  std::fs::write(&tmp_path, json).map_err(|e| DeidError::FileError {
    when: format!("writing \"{}\"", tmp_path.display()),
    details: e.to_string(),
  })?;

  std::fs::rename(&tmp_path, path).map_err(|e| DeidError::FileError {
    when: format!(
      "renaming \"{}\" to \"{}\"",
      tmp_path.display(),
      path.display()
    ),
    details: e.to_string(),
  })
}
