//! Run-scoped allocation and caching of patient pseudonyms and replacement
//! UIDs.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::DeidConfig;
use crate::error::DeidError;

/// Maximum length of a UI value.
const UID_MAX_LENGTH: usize = 64;

/// Number of digits in the accession number surrogate.
const NUMERIC_DIGEST_LENGTH: usize = 16;

/// Allocates pseudonyms and UIDs for one run.
///
/// Pseudonyms are resolved in precedence order: a value already cached for
/// the key (which is how per-patient override markers take effect), then the
/// caller-supplied table, then a sequential zero-padded fallback. Study and
/// series UIDs are cached per grouping so every record below the grouping
/// shares them; instance UIDs are always fresh.
///
pub struct IdentifierRemapper {
  uid_root: String,
  run_stamp: i64,
  pseudonym_table: Option<HashMap<String, String>>,
  require_table: bool,
  pseudonyms: HashMap<String, String>,
  next_ordinal: u32,
  study_uids: HashMap<(String, String), String>,
  series_uids: HashMap<(String, String, String), String>,
  issued_uids: HashSet<String>,
  uid_counter: u64,
}

impl IdentifierRemapper {
  pub fn new(config: &DeidConfig) -> Self {
    Self {
      uid_root: config.uid_root.clone(),
      run_stamp: chrono::Utc::now().timestamp(),
      pseudonym_table: config.pseudonym_table.clone(),
      require_table: config.require_pseudonym_table,
      pseudonyms: HashMap::new(),
      next_ordinal: 0,
      study_uids: HashMap::new(),
      series_uids: HashMap::new(),
      issued_uids: HashSet::new(),
      uid_counter: 0,
    }
  }

  /// Returns the pseudonym for an original patient key, allocating one on
  /// first sight and reusing it afterwards.
  ///
  pub fn patient_pseudonym(
    &mut self,
    original_key: &str,
  ) -> Result<String, DeidError> {
    if let Some(pseudonym) = self.pseudonyms.get(original_key) {
      return Ok(pseudonym.clone());
    }

    let supplied = self
      .pseudonym_table
      .as_ref()
      .and_then(|table| table.get(original_key));

    let pseudonym = match supplied {
      Some(pseudonym) => pseudonym.clone(),

      None if self.require_table => {
        return Err(DeidError::MissingMappingError {
          patient_key: original_key.to_string(),
        });
      }

      None => {
        let pseudonym = format!("{:06}", self.next_ordinal);
        self.next_ordinal += 1;
        pseudonym
      }
    };

    self
      .pseudonyms
      .insert(original_key.to_string(), pseudonym.clone());

    Ok(pseudonym)
  }

  /// Registers a caller-supplied override pseudonym for a patient. Takes
  /// precedence over the pseudonym table and the sequential fallback.
  ///
  pub fn set_override(&mut self, original_key: &str, pseudonym: &str) {
    self
      .pseudonyms
      .insert(original_key.to_string(), pseudonym.to_string());
  }

  /// Returns the replacement study UID, constant for all records under the
  /// same study.
  ///
  pub fn study_uid(&mut self, patient_key: &str, study_key: &str) -> String {
    let key = (patient_key.to_string(), study_key.to_string());

    if let Some(uid) = self.study_uids.get(&key) {
      return uid.clone();
    }

    let uid = self.fresh_uid();
    self.study_uids.insert(key, uid.clone());

    uid
  }

  /// Returns the replacement series UID, constant for all records under the
  /// same series.
  ///
  pub fn series_uid(
    &mut self,
    patient_key: &str,
    study_key: &str,
    series_key: &str,
  ) -> String {
    let key = (
      patient_key.to_string(),
      study_key.to_string(),
      series_key.to_string(),
    );

    if let Some(uid) = self.series_uids.get(&key) {
      return uid.clone();
    }

    let uid = self.fresh_uid();
    self.series_uids.insert(key, uid.clone());

    uid
  }

  /// Returns a fresh instance UID. Never cached.
  ///
  pub fn instance_uid(&mut self) -> String {
    self.fresh_uid()
  }

  fn fresh_uid(&mut self) -> String {
    let mut rng = rand::thread_rng();

    loop {
      self.uid_counter += 1;

      let uid = format!(
        "{}.{}.{}.{}",
        self.uid_root,
        self.run_stamp,
        self.uid_counter,
        rng.gen_range(0..=9999u32)
      );

      debug_assert!(uid.len() <= UID_MAX_LENGTH);

      if self.issued_uids.insert(uid.clone()) {
        return uid;
      }
    }
  }
}

/// Derives a fixed-length, digits-only surrogate from a pseudonym for use in
/// fields whose representation disallows non-digit characters. Same input
/// gives the same output across runs.
///
pub fn numeric_digest(pseudonym: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(pseudonym.as_bytes());
  let digest = hasher.finalize();

  digest
    .iter()
    .take(NUMERIC_DIGEST_LENGTH)
    .map(|byte| char::from(b'0' + byte % 10))
    .collect()
}
