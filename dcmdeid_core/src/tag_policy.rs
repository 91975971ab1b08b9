//! Declarative policy deciding what happens to each data element of a record
//! that survives the identifiability classifier.

use dicom::core::Tag;
use dicom::dictionary_std::tags;

/// The action taken for one data element. Every decision is total over
/// (tag, presence): an absent element is simply skipped.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagAction {
  /// The element passes through unchanged.
  Keep,

  /// The element is kept but its value is replaced with the empty value of
  /// its original VR.
  Blank,

  /// The element's value is replaced with an allocated identity (pseudonym,
  /// fresh UID, shifted date, recomputed age, or a digits-only surrogate).
  Substitute,

  /// The element is removed from the record entirely.
  Delete,
}

/// Identifying data elements that are blanked in every output record.
///
pub const BLANKED_TAGS: [Tag; 26] = [
  tags::INSTITUTION_NAME,
  tags::INSTITUTION_ADDRESS,
  tags::INSTITUTIONAL_DEPARTMENT_NAME,
  tags::REFERRING_PHYSICIAN_NAME,
  tags::REFERRING_PHYSICIAN_ADDRESS,
  tags::REFERRING_PHYSICIAN_TELEPHONE_NUMBERS,
  tags::PHYSICIANS_OF_RECORD,
  tags::PERFORMING_PHYSICIAN_NAME,
  tags::NAME_OF_PHYSICIANS_READING_STUDY,
  tags::OPERATORS_NAME,
  tags::ISSUER_OF_PATIENT_ID,
  tags::PATIENT_BIRTH_TIME,
  Tag(0x0010, 0x1000), // OtherPatientIDs
  tags::OTHER_PATIENT_NAMES,
  tags::PATIENT_BIRTH_NAME,
  tags::PATIENT_ADDRESS,
  tags::PATIENT_MOTHER_BIRTH_NAME,
  tags::COUNTRY_OF_RESIDENCE,
  tags::REGION_OF_RESIDENCE,
  tags::PATIENT_TELEPHONE_NUMBERS,
  tags::CURRENT_PATIENT_LOCATION,
  tags::PATIENT_INSTITUTION_RESIDENCE,
  tags::PERSON_ADDRESS,
  tags::PERSON_TELEPHONE_NUMBERS,
  tags::ORDER_CALLBACK_PHONE_NUMBER,
  tags::PERSON_NAME,
];

/// Referencing sequences that are deleted outright. Editing their items
/// would still leak the original identifiers, and all of them are optional
/// in the format, so omitting them is always legal.
///
pub const DELETED_SEQUENCES: [Tag; 7] = [
  tags::REFERENCED_STUDY_SEQUENCE,
  tags::REFERENCED_PATIENT_SEQUENCE,
  tags::REFERENCED_PERFORMED_PROCEDURE_STEP_SEQUENCE,
  tags::REFERRING_PHYSICIAN_IDENTIFICATION_SEQUENCE,
  tags::PERFORMING_PHYSICIAN_IDENTIFICATION_SEQUENCE,
  tags::PHYSICIANS_READING_STUDY_IDENTIFICATION_SEQUENCE,
  tags::PHYSICIANS_OF_RECORD_IDENTIFICATION_SEQUENCE,
];

/// Elements whose values are substituted with allocated identities.
///
pub const SUBSTITUTED_TAGS: [Tag; 8] = [
  tags::PATIENT_ID,
  tags::PATIENT_NAME,
  tags::PATIENT_BIRTH_DATE,
  tags::PATIENT_AGE,
  tags::ACCESSION_NUMBER,
  tags::STUDY_INSTANCE_UID,
  tags::SERIES_INSTANCE_UID,
  tags::SOP_INSTANCE_UID,
];

/// Acquisition-related date elements shifted by the per-patient day offset
/// when acquisition-date fuzzing is enabled.
///
pub const SHIFTED_DATE_TAGS: [Tag; 6] = [
  tags::STUDY_DATE,
  tags::SERIES_DATE,
  tags::ACQUISITION_DATE,
  tags::CONTENT_DATE,
  tags::INSTANCE_CREATION_DATE,
  tags::DATE_OF_SECONDARY_CAPTURE,
];

/// Returns the action applied to the given tag.
///
pub fn action_for(tag: Tag) -> TagAction {
  if BLANKED_TAGS.contains(&tag) {
    TagAction::Blank
  } else if DELETED_SEQUENCES.contains(&tag) {
    TagAction::Delete
  } else if SUBSTITUTED_TAGS.contains(&tag) || SHIFTED_DATE_TAGS.contains(&tag)
  {
    TagAction::Substitute
  } else {
    TagAction::Keep
  }
}

/// Returns whether the tag belongs to a private (odd-numbered) group.
///
pub fn is_private(tag: Tag) -> bool {
  tag.group() % 2 == 1
}
