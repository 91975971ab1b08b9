//! Per-patient date shifting, age recomputation, and ninety-plus capping.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use rand::Rng;

use crate::config::DeidConfig;

/// Sentinel birth date for patients whose age exceeds 89 years.
pub const NINETY_PLUS_BIRTH_DATE: &str = "19010101";

/// Sentinel age string for patients whose age exceeds 89 years.
pub const NINETY_PLUS_AGE: &str = "90+Y";

const DATE_FORMAT: &str = "%Y%m%d";

/// Allocates one day offset per patient and remembers which patients have
/// had the ninety-plus cap applied.
///
/// The offset is drawn on first encounter from a uniform symmetric window
/// unless the caller supplied one for that patient, and is then constant for
/// every date field of every record belonging to the patient.
///
pub struct DateShiftEngine {
  window_days: i64,
  offset_table: Option<HashMap<String, i64>>,
  offsets: HashMap<String, i64>,
  ninety_plus: HashSet<String>,
}

impl DateShiftEngine {
  pub fn new(config: &DeidConfig) -> Self {
    Self {
      window_days: i64::from(config.day_shift_window),
      offset_table: config.day_shift_table.clone(),
      offsets: HashMap::new(),
      ninety_plus: HashSet::new(),
    }
  }

  /// Returns the day offset for a patient, allocating it on first
  /// encounter.
  ///
  pub fn offset_for(&mut self, patient_key: &str) -> i64 {
    if let Some(offset) = self.offsets.get(patient_key) {
      return *offset;
    }

    let supplied = self
      .offset_table
      .as_ref()
      .and_then(|table| table.get(patient_key));

    let offset = match supplied {
      Some(offset) => *offset,
      None if self.window_days == 0 => 0,
      None => {
        rand::thread_rng().gen_range(-self.window_days..=self.window_days)
      }
    };

    self.offsets.insert(patient_key.to_string(), offset);

    offset
  }

  /// Marks a patient as capped. The patient's birth date and age are pinned
  /// to the sentinels and are exempt from shifting and recomputation for
  /// every subsequent record.
  ///
  pub fn mark_ninety_plus(&mut self, patient_key: &str) {
    self.ninety_plus.insert(patient_key.to_string());
  }

  pub fn is_ninety_plus(&self, patient_key: &str) -> bool {
    self.ninety_plus.contains(patient_key)
  }
}

/// Shifts a `YYYYMMDD` date by a signed number of days. Returns `None` for
/// values that don't parse as a date, which are left untouched by callers.
///
pub fn shift_date(date: &str, offset_days: i64) -> Option<String> {
  let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
  let shifted = date.checked_add_signed(Duration::days(offset_days))?;

  Some(shifted.format(DATE_FORMAT).to_string())
}

/// Returns the age string derived from a birth date and a reference date:
/// the integer number of elapsed years computed as floor(days / 365),
/// zero-padded to three digits.
///
pub fn recompute_age(
  birth_date: &str,
  reference_date: &str,
) -> Option<String> {
  let birth = NaiveDate::parse_from_str(birth_date.trim(), DATE_FORMAT).ok()?;
  let reference =
    NaiveDate::parse_from_str(reference_date.trim(), DATE_FORMAT).ok()?;

  let days = reference.signed_duration_since(birth).num_days();
  if days < 0 {
    return None;
  }

  Some(format!("{:03}Y", days / 365))
}

/// Returns the number of whole years encoded in an age value such as
/// `092Y`.
///
pub fn parse_age_years(age: &str) -> Option<i64> {
  let digits: String =
    age.chars().take_while(|c| c.is_ascii_digit()).collect();

  digits.parse().ok()
}
