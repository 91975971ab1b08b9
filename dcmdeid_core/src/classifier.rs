//! Detection of records that cannot be de-identified by field editing alone
//! because identifying text is baked into their pixel payload.

use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

use crate::utils::string_value;

/// ImageType marker of vendor screen captures, e.g. dose report screenshots.
const SCREEN_SAVE_MARKER: &str = "SCREEN SAVE";

/// ImageType marker of secondary capture images.
const SECONDARY_CAPTURE_MARKER: &str = "SECONDARY";

/// Decides whether a record must be excluded from the output entirely
/// instead of being anonymized field by field.
///
/// Institutions extend the matching rules in practice, so the walker takes
/// this as a swappable policy object rather than hardcoding the string
/// comparisons.
///
pub trait IdentifiabilityClassifier {
  /// Returns true when the record's pixel payload is likely to embed
  /// identifying text and the record must be deleted rather than edited.
  ///
  fn should_delete(&self, record: &InMemDicomObject) -> bool;
}

/// Default classifier covering vendor screen saves, CT secondary captures,
/// and structured reports.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct BurnedInTextClassifier;

impl IdentifiabilityClassifier for BurnedInTextClassifier {
  fn should_delete(&self, record: &InMemDicomObject) -> bool {
    let modality = string_value(record, tags::MODALITY);
    let image_type = string_value(record, tags::IMAGE_TYPE);

    is_identifiable(modality.as_deref(), image_type.as_deref())
  }
}

fn is_identifiable(modality: Option<&str>, image_type: Option<&str>) -> bool {
  let modality = modality.unwrap_or("").to_uppercase();
  let image_type = image_type.unwrap_or("").to_uppercase();

  if image_type.contains(SCREEN_SAVE_MARKER) {
    return true;
  }

  if image_type.contains(SECONDARY_CAPTURE_MARKER) && modality == "CT" {
    return true;
  }

  modality == "SR"
}
