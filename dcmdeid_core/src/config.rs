//! Run configuration for the de-identification engine.

use std::collections::HashMap;

use serde::Deserialize;

/// Default root prefix for generated UIDs.
pub const DEFAULT_UID_ROOT: &str = "1.2.826.0.1.3680043.9.7594";

/// Default prefix of patient folder names, e.g. the `sub` in `sub-1050`.
pub const DEFAULT_PATIENT_FOLDER_PREFIX: &str = "sub";

/// Configuration surface consumed by the engine. Owned by the caller and
/// typically assembled from CLI arguments, with the pseudonym and day-shift
/// tables loaded from JSON files produced by an external pseudonymization
/// service.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeidConfig {
  /// Whether to shift the patient birth date by the per-patient day offset.
  pub fuzz_birthdate: bool,

  /// Whether to shift acquisition-related dates (study date, series date,
  /// acquisition date, content date, instance creation date, secondary
  /// capture date) by the per-patient day offset. Also renames date-derived
  /// study folder names in the output accordingly.
  pub fuzz_acquisition_dates: bool,

  /// Half-width in days of the symmetric window day offsets are drawn from.
  /// Zero disables shifting for patients that have no entry in
  /// [`DeidConfig::day_shift_table`].
  pub day_shift_window: u32,

  /// Whether records flagged by the identifiability classifier are excluded
  /// from the output entirely.
  pub delete_identifiable_records: bool,

  /// Whether to strip all private (odd-group) data elements.
  pub strip_private_tags: bool,

  /// When set, every patient must have an entry in
  /// [`DeidConfig::pseudonym_table`] and sequential fallback allocation is
  /// not permitted.
  pub require_pseudonym_table: bool,

  /// When set, a patient folder without study/series/instance structure
  /// fails the whole run instead of only that patient's branch.
  pub strict_hierarchy: bool,

  /// Prefix of patient folder names. Stripped from input folder names to
  /// obtain the original patient key, and prepended to pseudonyms when
  /// renaming output folders.
  pub patient_folder_prefix: String,

  /// Root prefix of generated study/series/instance UIDs.
  pub uid_root: String,

  /// Caller-supplied mapping of original patient keys to pseudonyms.
  pub pseudonym_table: Option<HashMap<String, String>>,

  /// Caller-supplied mapping of original patient keys to day offsets.
  pub day_shift_table: Option<HashMap<String, i64>>,
}

impl Default for DeidConfig {
  fn default() -> Self {
    Self {
      fuzz_birthdate: true,
      fuzz_acquisition_dates: false,
      day_shift_window: 30,
      delete_identifiable_records: true,
      strip_private_tags: false,
      require_pseudonym_table: false,
      strict_hierarchy: false,
      patient_folder_prefix: DEFAULT_PATIENT_FOLDER_PREFIX.to_string(),
      uid_root: DEFAULT_UID_ROOT.to_string(),
      pseudonym_table: None,
      day_shift_table: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deserialize_with_defaults() {
    let config: DeidConfig = serde_json::from_str("{}").unwrap();

    assert!(config.fuzz_birthdate);
    assert!(!config.fuzz_acquisition_dates);
    assert_eq!(config.day_shift_window, 30);
    assert!(config.delete_identifiable_records);
    assert_eq!(config.patient_folder_prefix, "sub");
    assert!(config.pseudonym_table.is_none());
  }

  #[test]
  fn deserialize_with_tables() {
    let config: DeidConfig = serde_json::from_str(
      r#"{
        "day_shift_window": 7,
        "strip_private_tags": true,
        "pseudonym_table": { "1050": "000042" },
        "day_shift_table": { "1050": -3 }
      }"#,
    )
    .unwrap();

    assert_eq!(config.day_shift_window, 7);
    assert!(config.strip_private_tags);
    assert_eq!(
      config.pseudonym_table.unwrap().get("1050"),
      Some(&"000042".to_string())
    );
    assert_eq!(config.day_shift_table.unwrap().get("1050"), Some(&-3));
  }
}
