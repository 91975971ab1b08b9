//! Walks a patient/study/series/instance hierarchy and orchestrates the
//! per-record de-identification pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use crate::anonymizer::{self, RecordIdentity};
use crate::classifier::{BurnedInTextClassifier, IdentifiabilityClassifier};
use crate::config::DeidConfig;
use crate::date_shift::{self, DateShiftEngine};
use crate::error::DeidError;
use crate::mapping::MappingWriter;
use crate::remapper::IdentifierRemapper;
use crate::utils::path_with_suffix;

/// Name of the per-patient marker file that overrides pseudonym allocation.
/// The marker is consumed on use and never propagated to the output.
pub const OVERRIDE_MARKER_FILENAME: &str = "new_id.txt";

/// Counters and skip reasons accumulated over one run.
///
#[derive(Debug, Default)]
pub struct RunSummary {
  pub patients_processed: usize,
  pub records_written: usize,
  pub records_deleted: usize,
  pub records_skipped: Vec<(PathBuf, String)>,
  pub patients_skipped: Vec<(PathBuf, String)>,
}

/// Sequentially de-identifies every patient found under an input root into a
/// mirrored output hierarchy.
///
/// All run-scoped state (pseudonym and UID caches, day offsets, the mapping
/// accumulator) lives on this object and is passed by reference into the
/// other components, so independent runs never share allocations.
///
pub struct BatchAnonymizer {
  config: DeidConfig,
  remapper: IdentifierRemapper,
  date_shift: DateShiftEngine,
  classifier: Box<dyn IdentifiabilityClassifier>,
  mapping: MappingWriter,
}

impl BatchAnonymizer {
  pub fn new(config: DeidConfig) -> Self {
    Self::with_classifier(config, Box::new(BurnedInTextClassifier))
  }

  /// Creates a batch anonymizer with a custom identifiability classifier.
  ///
  pub fn with_classifier(
    config: DeidConfig,
    classifier: Box<dyn IdentifiabilityClassifier>,
  ) -> Self {
    let remapper = IdentifierRemapper::new(&config);
    let date_shift = DateShiftEngine::new(&config);

    Self {
      config,
      remapper,
      date_shift,
      classifier,
      mapping: MappingWriter::new(),
    }
  }

  /// Runs the full de-identification of the hierarchy under `input_root`
  /// into `output_root` and writes the mapping artifacts.
  ///
  /// Patient folders are visited in sorted order so that fallback pseudonym
  /// ordinals are deterministic for a given input tree.
  ///
  pub fn run(
    mut self,
    input_root: &Path,
    output_root: &Path,
  ) -> Result<RunSummary, DeidError> {
    let mut summary = RunSummary::default();

    fs::create_dir_all(output_root).map_err(|e| DeidError::FileError {
      when: format!("creating \"{}\"", output_root.display()),
      details: e.to_string(),
    })?;

    for patient_dir in subdirectories(input_root)? {
      match self.process_patient(&patient_dir, output_root, &mut summary) {
        Ok(()) => summary.patients_processed += 1,

        Err(DeidError::StructuralError { path, details })
          if !self.config.strict_hierarchy =>
        {
          eprintln!(
            "Warning: Skipping patient folder \"{}\": {}",
            path.display(),
            details
          );
          summary.patients_skipped.push((path, details));
        }

        Err(e) => return Err(e),
      }
    }

    self.mapping.finalize(output_root)?;

    Ok(summary)
  }

  fn process_patient(
    &mut self,
    patient_dir: &Path,
    output_root: &Path,
    summary: &mut RunSummary,
  ) -> Result<(), DeidError> {
    let folder_name = folder_name(patient_dir);
    let prefix = format!("{}-", self.config.patient_folder_prefix);
    let patient_key = folder_name
      .strip_prefix(&prefix)
      .unwrap_or(&folder_name)
      .to_string();

    let study_dirs = subdirectories(patient_dir)?;
    if study_dirs.is_empty() {
      return Err(DeidError::StructuralError {
        path: patient_dir.to_path_buf(),
        details: "no study directories found".to_string(),
      });
    }

    let override_id = self.consume_override_marker(patient_dir)?;
    if let Some(id) = &override_id {
      self.remapper.set_override(&patient_key, id);
    }

    let pseudonym = self.remapper.patient_pseudonym(&patient_key)?;
    let offset = self.date_shift.offset_for(&patient_key);

    println!("Anonymizing \"{folder_name}\" => \"{prefix}{pseudonym}\" …");

    let patient_out = output_root.join(&folder_name);

    for study_dir in &study_dirs {
      self.process_study(
        study_dir,
        &patient_key,
        &pseudonym,
        offset,
        &patient_out,
        summary,
      )?;
    }

    self.rename_patient_output(&patient_out, output_root, &pseudonym)?;

    match &override_id {
      Some(id) => {
        let numeric_suffix =
          folder_name.rsplit('-').next().unwrap_or(&folder_name);
        self.mapping.record_override(id, numeric_suffix);
      }

      None => self.mapping.record_patient(&pseudonym, &patient_key),
    }
    self.mapping.record_offset(&pseudonym, offset);

    Ok(())
  }

  fn process_study(
    &mut self,
    study_dir: &Path,
    patient_key: &str,
    pseudonym: &str,
    offset: i64,
    patient_out: &Path,
    summary: &mut RunSummary,
  ) -> Result<(), DeidError> {
    let study_name = folder_name(study_dir);

    let series_dirs = subdirectories(study_dir)?;
    if series_dirs.is_empty() {
      return Err(DeidError::StructuralError {
        path: study_dir.to_path_buf(),
        details: "no series directories found".to_string(),
      });
    }

    let study_uid = self.remapper.study_uid(patient_key, &study_name);
    let study_out = patient_out.join(&study_name);

    for series_dir in &series_dirs {
      let series_name = folder_name(series_dir);
      let series_uid =
        self
          .remapper
          .series_uid(patient_key, &study_name, &series_name);
      let series_out = study_out.join(&series_name);

      for file in instance_files(series_dir) {
        self.process_instance(
          &file,
          &series_out,
          patient_key,
          pseudonym,
          &study_uid,
          &series_uid,
          offset,
          summary,
        )?;
      }
    }

    // Study folders commonly embed the acquisition date in their name, so
    // keep the folder name consistent with the shifted dates. Once per
    // study, not per instance.
    if self.config.fuzz_acquisition_dates && study_out.is_dir() {
      if let Some(shifted_name) = shifted_folder_name(&study_name, offset) {
        if shifted_name != study_name {
          rename_with_disambiguation(
            &study_out,
            &study_out.with_file_name(shifted_name),
          )?;
        }
      }
    }

    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn process_instance(
    &mut self,
    path: &Path,
    series_out: &Path,
    patient_key: &str,
    pseudonym: &str,
    study_uid: &str,
    series_uid: &str,
    offset: i64,
    summary: &mut RunSummary,
  ) -> Result<(), DeidError> {
    let record = match dicom::object::open_file(path) {
      Ok(record) => record,

      Err(e) => {
        let error = DeidError::FormatError {
          path: path.to_path_buf(),
          details: e.to_string(),
        };
        eprintln!("Warning: Skipping record: {error}");
        summary.records_skipped.push((path.to_path_buf(), error.to_string()));
        return Ok(());
      }
    };

    if self.config.delete_identifiable_records
      && self.classifier.should_delete(&record)
    {
      summary.records_deleted += 1;
      return Ok(());
    }

    let identity = RecordIdentity {
      patient_key: patient_key.to_string(),
      pseudonym: pseudonym.to_string(),
      study_uid: study_uid.to_string(),
      series_uid: series_uid.to_string(),
      instance_uid: self.remapper.instance_uid(),
      date_offset_days: offset,
    };

    let output = match anonymizer::anonymize_record(
      &record,
      &identity,
      &self.config,
      &mut self.date_shift,
    ) {
      Ok(output) => output,

      Err(e) => {
        eprintln!("Warning: Skipping record: {e}");
        summary.records_skipped.push((path.to_path_buf(), e.to_string()));
        return Ok(());
      }
    };

    fs::create_dir_all(series_out).map_err(|e| DeidError::FileError {
      when: format!("creating \"{}\"", series_out.display()),
      details: e.to_string(),
    })?;

    let output_path =
      series_out.join(format!("{}.dcm", identity.instance_uid));
    output
      .write_to_file(&output_path)
      .map_err(|e| DeidError::FileError {
        when: format!("writing \"{}\"", output_path.display()),
        details: e.to_string(),
      })?;

    summary.records_written += 1;

    Ok(())
  }

  fn consume_override_marker(
    &self,
    patient_dir: &Path,
  ) -> Result<Option<String>, DeidError> {
    let marker = patient_dir.join(OVERRIDE_MARKER_FILENAME);
    if !marker.is_file() {
      return Ok(None);
    }

    let contents =
      fs::read_to_string(&marker).map_err(|e| DeidError::FileError {
        when: format!("reading \"{}\"", marker.display()),
        details: e.to_string(),
      })?;

    fs::remove_file(&marker).map_err(|e| DeidError::FileError {
      when: format!("removing \"{}\"", marker.display()),
      details: e.to_string(),
    })?;

    Ok(
      contents
        .lines()
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from),
    )
  }

  fn rename_patient_output(
    &self,
    patient_out: &Path,
    output_root: &Path,
    pseudonym: &str,
  ) -> Result<(), DeidError> {
    // Every record of the patient may have been deleted or skipped, in
    // which case there is nothing to rename
    if !patient_out.exists() {
      return Ok(());
    }

    let target = output_root.join(format!(
      "{}-{}",
      self.config.patient_folder_prefix, pseudonym
    ));

    if target == patient_out {
      return Ok(());
    }

    rename_with_disambiguation(patient_out, &target)?;

    Ok(())
  }
}

fn folder_name(dir: &Path) -> String {
  dir
    .file_name()
    .unwrap_or(std::ffi::OsStr::new(""))
    .to_string_lossy()
    .to_string()
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, DeidError> {
  let entries = fs::read_dir(dir).map_err(|e| DeidError::FileError {
    when: format!("reading directory \"{}\"", dir.display()),
    details: e.to_string(),
  })?;

  let mut dirs: Vec<PathBuf> = entries
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.is_dir())
    .collect();

  dirs.sort();

  Ok(dirs)
}

fn instance_files(series_dir: &Path) -> Vec<PathBuf> {
  walkdir::WalkDir::new(series_dir)
    .sort_by_file_name()
    .into_iter()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_file())
    .map(|entry| entry.into_path())
    .collect()
}

/// Renames `from` to `to`, appending a `_2` suffix instead of overwriting
/// when the target already exists.
///
fn rename_with_disambiguation(
  from: &Path,
  to: &Path,
) -> Result<PathBuf, DeidError> {
  let target = if to.exists() {
    let fallback = path_with_suffix(&to.to_path_buf(), "_2");

    if fallback.exists() {
      return Err(DeidError::DirectoryCollisionError {
        path: to.to_path_buf(),
      });
    }

    fallback
  } else {
    to.to_path_buf()
  };

  fs::rename(from, &target).map_err(|e| DeidError::FileError {
    when: format!(
      "renaming \"{}\" to \"{}\"",
      from.display(),
      target.display()
    ),
    details: e.to_string(),
  })?;

  Ok(target)
}

/// Shifts the leading `YYYYMMDD` component of a date-derived folder name
/// such as `ses-20200101120000`. Returns `None` for names that don't embed
/// a date.
///
fn shifted_folder_name(name: &str, offset_days: i64) -> Option<String> {
  let (prefix, rest) = match name.split_once('-') {
    Some((prefix, rest)) if !rest.is_empty() => {
      (format!("{prefix}-"), rest)
    }
    _ => (String::new(), name),
  };

  if rest.len() < 8 || !rest.is_char_boundary(8) {
    return None;
  }

  let (date, tail) = rest.split_at(8);
  if !date.chars().all(|c| c.is_ascii_digit()) {
    return None;
  }

  let shifted = date_shift::shift_date(date, offset_days)?;

  Some(format!("{prefix}{shifted}{tail}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::collections::{HashMap, HashSet};

  use dicom::core::{DataElement, VR};
  use dicom::dictionary_std::{tags, uids};
  use dicom::object::{FileMetaTableBuilder, InMemDicomObject, open_file};

  use crate::mapping::{DAY_SHIFTS_FILENAME, MAPPING_FILENAME};

  fn write_instance(
    path: &Path,
    patient_id: &str,
    modality: &str,
    sop_uid: &str,
  ) {
    let elements = [
      (tags::SOP_CLASS_UID, VR::UI, uids::MR_IMAGE_STORAGE),
      (tags::SOP_INSTANCE_UID, VR::UI, sop_uid),
      (tags::STUDY_INSTANCE_UID, VR::UI, "1.9.9.1"),
      (tags::SERIES_INSTANCE_UID, VR::UI, "1.9.9.2"),
      (tags::MODALITY, VR::CS, modality),
      (tags::PATIENT_ID, VR::LO, patient_id),
      (tags::PATIENT_NAME, VR::PN, "Doe^Jane"),
      (tags::PATIENT_BIRTH_DATE, VR::DA, "19800101"),
      (tags::PATIENT_AGE, VR::AS, "040Y"),
      (tags::STUDY_DATE, VR::DA, "20200101"),
      (tags::INSTITUTION_NAME, VR::LO, "General Hospital"),
    ]
    .map(|(tag, vr, value)| DataElement::new(tag, vr, value));

    let record = InMemDicomObject::from_element_iter(elements)
      .with_meta(
        FileMetaTableBuilder::new()
          .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
      )
      .unwrap();

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    record.write_to_file(path).unwrap();
  }

  fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .collect();
    files.sort();
    files
  }

  fn string_of(path: &Path, tag: dicom::core::Tag) -> String {
    open_file(path)
      .unwrap()
      .element(tag)
      .unwrap()
      .to_str()
      .unwrap()
      .to_string()
  }

  #[test]
  fn run_anonymizes_a_patient_hierarchy() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let series = input.path().join("sub-1050/ses-20200101/0001-MR");
    write_instance(&series.join("a.dcm"), "1050", "MR", "1.9.9.3");
    write_instance(&series.join("b.dcm"), "1050", "MR", "1.9.9.4");
    write_instance(&series.join("report.dcm"), "1050", "SR", "1.9.9.5");

    let summary = BatchAnonymizer::new(DeidConfig::default())
      .run(input.path(), output.path())
      .unwrap();

    assert_eq!(summary.patients_processed, 1);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.records_deleted, 1);
    assert!(summary.records_skipped.is_empty());

    let series_out = output.path().join("sub-000000/ses-20200101/0001-MR");
    let files = output_files(&series_out);
    assert_eq!(files.len(), 2);

    let mut series_uids = HashSet::new();
    let mut instance_uids = HashSet::new();

    for file in &files {
      assert_eq!(string_of(file, tags::PATIENT_ID), "000000");
      assert_eq!(string_of(file, tags::PATIENT_NAME), "000000^sub");
      assert_eq!(string_of(file, tags::INSTITUTION_NAME), "");

      let sop_uid = string_of(file, tags::SOP_INSTANCE_UID);
      assert_eq!(
        file.file_name().unwrap().to_string_lossy(),
        format!("{sop_uid}.dcm")
      );

      let birth_date = chrono::NaiveDate::parse_from_str(
        &string_of(file, tags::PATIENT_BIRTH_DATE),
        "%Y%m%d",
      )
      .unwrap();
      let original =
        chrono::NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
      assert!(
        birth_date.signed_duration_since(original).num_days().abs() <= 30
      );

      series_uids.insert(string_of(file, tags::SERIES_INSTANCE_UID));
      instance_uids.insert(sop_uid);
    }

    // One series UID shared by both records, two distinct instance UIDs
    assert_eq!(series_uids.len(), 1);
    assert_eq!(instance_uids.len(), 2);

    let mapping: HashMap<String, String> = serde_json::from_str(
      &fs::read_to_string(output.path().join(MAPPING_FILENAME)).unwrap(),
    )
    .unwrap();
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping.get("000000"), Some(&"1050".to_string()));

    let day_shifts: HashMap<String, i64> = serde_json::from_str(
      &fs::read_to_string(output.path().join(DAY_SHIFTS_FILENAME)).unwrap(),
    )
    .unwrap();
    let offset = day_shifts.get("000000").copied().unwrap();
    assert!((-30..=30).contains(&offset));
  }

  #[test]
  fn patients_share_one_offset_and_study_uid() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let study = input.path().join("sub-1050/ses-20200101");
    write_instance(&study.join("0001-MR/a.dcm"), "1050", "MR", "1.9.9.3");
    write_instance(&study.join("0002-MR/b.dcm"), "1050", "MR", "1.9.9.4");

    BatchAnonymizer::new(DeidConfig::default())
      .run(input.path(), output.path())
      .unwrap();

    let study_out = output.path().join("sub-000000/ses-20200101");
    let first_series = output_files(&study_out.join("0001-MR"));
    let second_series = output_files(&study_out.join("0002-MR"));
    let first = &first_series[0];
    let second = &second_series[0];

    assert_eq!(
      string_of(first, tags::STUDY_INSTANCE_UID),
      string_of(second, tags::STUDY_INSTANCE_UID)
    );
    assert_ne!(
      string_of(first, tags::SERIES_INSTANCE_UID),
      string_of(second, tags::SERIES_INSTANCE_UID)
    );
    assert_eq!(
      string_of(first, tags::PATIENT_BIRTH_DATE),
      string_of(second, tags::PATIENT_BIRTH_DATE)
    );
  }

  #[test]
  fn override_marker_is_consumed_and_wins() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let patient = input.path().join("sub-1050");
    write_instance(
      &patient.join("ses-20200101/0001-MR/a.dcm"),
      "1050",
      "MR",
      "1.9.9.3",
    );
    fs::write(patient.join(OVERRIDE_MARKER_FILENAME), "CUSTOM01\n").unwrap();

    BatchAnonymizer::new(DeidConfig::default())
      .run(input.path(), output.path())
      .unwrap();

    assert!(output.path().join("sub-CUSTOM01").is_dir());
    assert!(!patient.join(OVERRIDE_MARKER_FILENAME).exists());
    assert!(
      !output
        .path()
        .join("sub-CUSTOM01")
        .join(OVERRIDE_MARKER_FILENAME)
        .exists()
    );

    let mapping: HashMap<String, String> = serde_json::from_str(
      &fs::read_to_string(output.path().join(MAPPING_FILENAME)).unwrap(),
    )
    .unwrap();
    assert_eq!(mapping.get("CUSTOM01"), Some(&"1050".to_string()));
  }

  #[test]
  fn malformed_patient_folder_is_skipped_by_default() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    fs::create_dir_all(input.path().join("sub-1050")).unwrap();
    write_instance(
      &input.path().join("sub-1051/ses-20200101/0001-MR/a.dcm"),
      "1051",
      "MR",
      "1.9.9.3",
    );

    let summary = BatchAnonymizer::new(DeidConfig::default())
      .run(input.path(), output.path())
      .unwrap();

    assert_eq!(summary.patients_processed, 1);
    assert_eq!(summary.patients_skipped.len(), 1);
  }

  #[test]
  fn malformed_patient_folder_is_fatal_in_strict_mode() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    fs::create_dir_all(input.path().join("sub-1050")).unwrap();

    let config = DeidConfig {
      strict_hierarchy: true,
      ..DeidConfig::default()
    };

    let result = BatchAnonymizer::new(config).run(input.path(), output.path());

    assert!(matches!(result, Err(DeidError::StructuralError { .. })));
  }

  #[test]
  fn unreadable_records_are_skipped() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let series = input.path().join("sub-1050/ses-20200101/0001-MR");
    write_instance(&series.join("a.dcm"), "1050", "MR", "1.9.9.3");
    fs::create_dir_all(&series).unwrap();
    fs::write(series.join("not-a-record.dcm"), b"garbage").unwrap();

    let summary = BatchAnonymizer::new(DeidConfig::default())
      .run(input.path(), output.path())
      .unwrap();

    assert_eq!(summary.records_written, 1);
    assert_eq!(summary.records_skipped.len(), 1);
  }

  #[test]
  fn missing_required_mapping_fails_the_run() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_instance(
      &input.path().join("sub-1050/ses-20200101/0001-MR/a.dcm"),
      "1050",
      "MR",
      "1.9.9.3",
    );

    let config = DeidConfig {
      require_pseudonym_table: true,
      pseudonym_table: Some(HashMap::new()),
      ..DeidConfig::default()
    };

    let result = BatchAnonymizer::new(config).run(input.path(), output.path());

    assert_eq!(
      result.unwrap_err(),
      DeidError::MissingMappingError {
        patient_key: "1050".to_string()
      }
    );
  }

  #[test]
  fn acquisition_date_fuzzing_renames_study_folders() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_instance(
      &input.path().join("sub-1050/ses-20200101120000/0001-MR/a.dcm"),
      "1050",
      "MR",
      "1.9.9.3",
    );

    let config = DeidConfig {
      fuzz_acquisition_dates: true,
      day_shift_table: Some([("1050".to_string(), 10)].into_iter().collect()),
      ..DeidConfig::default()
    };

    BatchAnonymizer::new(config)
      .run(input.path(), output.path())
      .unwrap();

    let study_out = output.path().join("sub-000000/ses-20200111120000");
    assert!(study_out.is_dir());

    let files = output_files(&study_out.join("0001-MR"));
    assert_eq!(string_of(&files[0], tags::STUDY_DATE), "20200111");
  }

  #[test]
  fn colliding_pseudonyms_get_a_disambiguating_suffix() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_instance(
      &input.path().join("sub-1050/ses-20200101/0001-MR/a.dcm"),
      "1050",
      "MR",
      "1.9.9.3",
    );
    write_instance(
      &input.path().join("sub-1051/ses-20200101/0001-MR/b.dcm"),
      "1051",
      "MR",
      "1.9.9.4",
    );

    let table: HashMap<String, String> = [
      ("1050".to_string(), "P1".to_string()),
      ("1051".to_string(), "P1".to_string()),
    ]
    .into_iter()
    .collect();

    let config = DeidConfig {
      pseudonym_table: Some(table),
      ..DeidConfig::default()
    };

    BatchAnonymizer::new(config)
      .run(input.path(), output.path())
      .unwrap();

    assert!(output.path().join("sub-P1").is_dir());
    assert!(output.path().join("sub-P1_2").is_dir());
  }

  #[test]
  fn shifted_folder_name_test() {
    assert_eq!(
      shifted_folder_name("ses-20200101", 10),
      Some("ses-20200111".to_string())
    );
    assert_eq!(
      shifted_folder_name("ses-20200101120000", -1),
      Some("ses-20191231120000".to_string())
    );
    assert_eq!(
      shifted_folder_name("20200101", 1),
      Some("20200102".to_string())
    );
    assert_eq!(shifted_folder_name("0001-Scans", 10), None);
    assert_eq!(shifted_folder_name("scans", 10), None);
  }
}
