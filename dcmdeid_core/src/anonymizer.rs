//! Transformation of a single record into its de-identified copy.

use dicom::core::header::Header;
use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};

use crate::config::DeidConfig;
use crate::date_shift::{
  self, DateShiftEngine, NINETY_PLUS_AGE, NINETY_PLUS_BIRTH_DATE,
};
use crate::error::DeidError;
use crate::remapper;
use crate::tag_policy::{SHIFTED_DATE_TAGS, TagAction, action_for, is_private};
use crate::utils::string_value;

/// The identity allocations that apply to one record: the pseudonym and day
/// offset of its patient, the UIDs of its study and series, and its own
/// fresh instance UID.
///
#[derive(Clone, Debug)]
pub struct RecordIdentity {
  pub patient_key: String,
  pub pseudonym: String,
  pub study_uid: String,
  pub series_uid: String,
  pub instance_uid: String,
  pub date_offset_days: i64,
}

/// Builds the de-identified copy of a record.
///
/// The order of operations is: ninety-plus capping is decided on the age as
/// it arrived, identifying elements are blanked and referencing sequences
/// deleted, identifiers are substituted, enabled date fields are shifted by
/// the patient's offset, and the age is recomputed last from the output
/// birth date and study date. The output carries a rebuilt file meta group
/// whose storage instance UID mirrors the fresh instance UID.
///
pub fn anonymize_record(
  record: &FileDicomObject<InMemDicomObject>,
  identity: &RecordIdentity,
  config: &DeidConfig,
  date_shift_engine: &mut DateShiftEngine,
) -> Result<FileDicomObject<InMemDicomObject>, DeidError> {
  let mut dataset = InMemDicomObject::from_element_iter(record.iter().cloned());

  if let Some(age) = string_value(&dataset, tags::PATIENT_AGE) {
    if date_shift::parse_age_years(&age).is_some_and(|years| years > 89) {
      date_shift_engine.mark_ninety_plus(&identity.patient_key);
    }
  }
  let capped = date_shift_engine.is_ninety_plus(&identity.patient_key);

  blank_identifying_elements(&mut dataset);
  delete_referencing_sequences(&mut dataset);

  if config.strip_private_tags {
    strip_private_elements(&mut dataset);
  }

  substitute_if_present(
    &mut dataset,
    tags::PATIENT_ID,
    VR::LO,
    identity.pseudonym.clone(),
  );
  substitute_if_present(
    &mut dataset,
    tags::PATIENT_NAME,
    VR::PN,
    format!("{}^sub", identity.pseudonym),
  );
  substitute_if_present(
    &mut dataset,
    tags::ACCESSION_NUMBER,
    VR::SH,
    remapper::numeric_digest(&identity.pseudonym),
  );
  substitute_if_present(
    &mut dataset,
    tags::STUDY_INSTANCE_UID,
    VR::UI,
    identity.study_uid.clone(),
  );
  substitute_if_present(
    &mut dataset,
    tags::SERIES_INSTANCE_UID,
    VR::UI,
    identity.series_uid.clone(),
  );
  dataset.put(DataElement::new(
    tags::SOP_INSTANCE_UID,
    VR::UI,
    PrimitiveValue::from(identity.instance_uid.clone()),
  ));

  if capped {
    dataset.put(DataElement::new(
      tags::PATIENT_BIRTH_DATE,
      VR::DA,
      PrimitiveValue::from(NINETY_PLUS_BIRTH_DATE),
    ));
    dataset.put(DataElement::new(
      tags::PATIENT_AGE,
      VR::AS,
      PrimitiveValue::from(NINETY_PLUS_AGE),
    ));
  } else if config.fuzz_birthdate {
    shift_date_element(
      &mut dataset,
      tags::PATIENT_BIRTH_DATE,
      identity.date_offset_days,
    );
  }

  if config.fuzz_acquisition_dates {
    for tag in SHIFTED_DATE_TAGS {
      shift_date_element(&mut dataset, tag, identity.date_offset_days);
    }
  }

  if !capped {
    let birth_date = string_value(&dataset, tags::PATIENT_BIRTH_DATE);
    let study_date = string_value(&dataset, tags::STUDY_DATE);

    if let (Some(birth_date), Some(study_date)) = (birth_date, study_date) {
      if let Some(age) = date_shift::recompute_age(&birth_date, &study_date) {
        dataset.put(DataElement::new(
          tags::PATIENT_AGE,
          VR::AS,
          PrimitiveValue::from(age),
        ));
      }
    }
  }

  let meta = FileMetaTableBuilder::new()
    .media_storage_sop_class_uid(
      record
        .meta()
        .media_storage_sop_class_uid
        .trim_end_matches('\0'),
    )
    .media_storage_sop_instance_uid(identity.instance_uid.as_str())
    .transfer_syntax(record.meta().transfer_syntax.trim_end_matches('\0'));

  dataset.with_meta(meta).map_err(|e| DeidError::FileError {
    when: "rebuilding file meta group".to_string(),
    details: e.to_string(),
  })
}

fn blank_identifying_elements(dataset: &mut InMemDicomObject) {
  let present: Vec<(Tag, VR)> = dataset
    .iter()
    .filter(|element| action_for(element.tag()) == TagAction::Blank)
    .map(|element| (element.tag(), element.vr()))
    .collect();

  for (tag, vr) in present {
    dataset.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
  }
}

fn delete_referencing_sequences(dataset: &mut InMemDicomObject) {
  let deleted: Vec<Tag> = dataset
    .iter()
    .map(|element| element.tag())
    .filter(|tag| action_for(*tag) == TagAction::Delete)
    .collect();

  for tag in deleted {
    dataset.remove_element(tag);
  }
}

fn strip_private_elements(dataset: &mut InMemDicomObject) {
  let private: Vec<Tag> = dataset
    .iter()
    .map(|element| element.tag())
    .filter(|tag| is_private(*tag))
    .collect();

  for tag in private {
    dataset.remove_element(tag);
  }
}

fn substitute_if_present(
  dataset: &mut InMemDicomObject,
  tag: Tag,
  vr: VR,
  value: String,
) {
  if dataset.element(tag).is_ok() {
    dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
  }
}

fn shift_date_element(
  dataset: &mut InMemDicomObject,
  tag: Tag,
  offset_days: i64,
) {
  if let Some(original) = string_value(dataset, tag) {
    if let Some(shifted) = date_shift::shift_date(&original, offset_days) {
      dataset.put(DataElement::new(tag, VR::DA, PrimitiveValue::from(shifted)));
    }
  }
}
