//! Small shared helpers.

use std::path::PathBuf;

use dicom::core::Tag;
use dicom::object::InMemDicomObject;

/// Reads an element's value as a trimmed string, returning `None` when the
/// element is absent or its value has no string form. Absence is a normal,
/// expected state and never an error.
///
pub(crate) fn string_value(
  record: &InMemDicomObject,
  tag: Tag,
) -> Option<String> {
  let value = record.element(tag).ok()?.to_str().ok()?;
  let value = value.trim_end_matches(['\0', ' ']);

  if value.is_empty() {
    None
  } else {
    Some(value.to_string())
  }
}

/// Appends a suffix to a path's file name.
///
pub(crate) fn path_with_suffix(path: &PathBuf, suffix: &str) -> PathBuf {
  let mut path = path.clone();

  path.set_file_name(format!(
    "{}{}",
    path
      .file_name()
      .unwrap_or(std::ffi::OsStr::new(""))
      .to_string_lossy(),
    suffix
  ));

  path
}
