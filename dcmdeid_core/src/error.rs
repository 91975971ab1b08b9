//! Error types for the de-identification engine.

use std::io::Write;
use std::path::PathBuf;

use owo_colors::{OwoColorize, Stream::Stderr};

/// Errors that can occur while de-identifying a directory hierarchy.
///
/// Per-record errors ([`DeidError::FormatError`]) are always recovered
/// locally by the walker: the record is skipped and reported. Structural
/// errors are recovered or fatal depending on configuration. Mapping errors
/// are always fatal because fabricating identifiers for data that requires a
/// pre-agreed mapping would break the identity contract of the run.
///
#[derive(Clone, Debug, PartialEq)]
pub enum DeidError {
  /// A file could not be read as a DICOM record, or its content could not be
  /// reassembled into a valid output record.
  FormatError { path: PathBuf, details: String },

  /// A required pseudonym was absent from the caller-supplied mapping table
  /// and fallback allocation is not permitted.
  MissingMappingError { patient_key: String },

  /// A patient folder contains no discoverable study/series/instance
  /// structure.
  StructuralError { path: PathBuf, details: String },

  /// A renamed output folder and its disambiguated fallback name both
  /// already exist.
  DirectoryCollisionError { path: PathBuf },

  /// A filesystem operation failed.
  FileError { when: String, details: String },
}

impl DeidError {
  /// Returns lines of text that describe the error in a human-readable
  /// format.
  ///
  pub fn to_lines(&self, task_description: &str) -> Vec<String> {
    let mut lines = vec![
      format!("DICOM de-identification error {task_description}"),
      "".to_string(),
    ];

    match self {
      DeidError::FormatError { path, details } => {
        lines.push("Error: Invalid record".to_string());
        lines.push(format!("  Path: {}", path.display()));
        lines.push(format!("  Details: {details}"));
      }

      DeidError::MissingMappingError { patient_key } => {
        lines.push("Error: Missing pseudonym mapping".to_string());
        lines.push(format!("  Patient key: {patient_key}"));
        lines.push(
          "  A pseudonym table was required but contains no entry for this \
           patient"
            .to_string(),
        );
      }

      DeidError::StructuralError { path, details } => {
        lines.push("Error: Invalid patient folder structure".to_string());
        lines.push(format!("  Path: {}", path.display()));
        lines.push(format!("  Details: {details}"));
      }

      DeidError::DirectoryCollisionError { path } => {
        lines.push("Error: Output folder collision".to_string());
        lines.push(format!("  Path: {}", path.display()));
        lines.push(
          "  The target folder and its disambiguated fallback both already \
           exist"
            .to_string(),
        );
      }

      DeidError::FileError { when, details } => {
        lines.push(format!("Error: File error {when}"));
        lines.push(format!("  Details: {details}"));
      }
    }

    lines
  }

  /// Prints details on the error to stderr.
  ///
  pub fn print(&self, task_description: &str) {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    eprintln!();
    eprintln!("{}", "-----".if_supports_color(Stderr, |text| text.red()));

    for line in self.to_lines(task_description) {
      eprintln!("{}", line.if_supports_color(Stderr, |text| text.red()));
    }

    eprintln!();
  }
}

impl core::fmt::Display for DeidError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      DeidError::FormatError { path, details } => {
        write!(f, "Invalid record at '{}': {details}", path.display())
      }

      DeidError::MissingMappingError { patient_key } => {
        write!(f, "No pseudonym mapping for patient '{patient_key}'")
      }

      DeidError::StructuralError { path, details } => {
        write!(
          f,
          "Invalid patient folder structure at '{}': {details}",
          path.display()
        )
      }

      DeidError::DirectoryCollisionError { path } => {
        write!(
          f,
          "Output folder '{}' and its disambiguated fallback both already \
           exist",
          path.display()
        )
      }

      DeidError::FileError { when, details } => {
        write!(f, "File error {when}: {details}")
      }
    }
  }
}

impl std::error::Error for DeidError {}
