use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use clap::Args;

use dcmdeid_core::config::{DEFAULT_PATIENT_FOLDER_PREFIX, DEFAULT_UID_ROOT};
use dcmdeid_core::{BatchAnonymizer, DeidConfig, RunSummary};

pub const ABOUT: &str =
  "De-identifies a directory hierarchy of per-patient DICOM files";

#[derive(Args)]
pub struct AnonymizeArgs {
  #[clap(
    long,
    short = 'i',
    help = "The root directory of the input hierarchy. Patient folders are \
      expected directly beneath it, with study, series, and record files \
      nested below."
  )]
  input_directory: PathBuf,

  #[clap(
    long,
    short = 'o',
    help = "The root directory the de-identified hierarchy is written into. \
      Created if it does not exist. The pseudonym mapping and day-shift \
      artifacts are written here at the end of the run."
  )]
  output_directory: PathBuf,

  #[arg(
    long,
    help = "A JSON file mapping original patient keys to pseudonyms, as \
      produced by an external pseudonymization service. Patients not listed \
      in the file fall back to sequential allocation unless \
      --require-new-ids is specified."
  )]
  new_ids: Option<PathBuf>,

  #[arg(
    long,
    help = "A JSON file mapping original patient keys to day shifts. \
      Patients not listed in the file draw a random offset from the \
      --day-shift-window."
  )]
  day_shifts: Option<PathBuf>,

  #[arg(
    long,
    help = "Half-width in days of the symmetric window day offsets are \
      drawn from. Specify 0 to disable date shifting for patients that have \
      no entry in --day-shifts.",
    default_value_t = 30
  )]
  day_shift_window: u32,

  #[arg(
    long,
    help = "Whether to leave the patient birth date unshifted.",
    default_value_t = false
  )]
  no_fuzz_birthdate: bool,

  #[arg(
    long,
    help = "Whether to shift acquisition-related dates (study date, series \
      date, acquisition date, content date, instance creation date, \
      secondary capture date) by the per-patient day offset, and to rename \
      date-derived study folder names accordingly.",
    default_value_t = false
  )]
  fuzz_acquisition_dates: bool,

  #[arg(
    long,
    help = "Whether to keep records whose pixel data is likely to embed \
      identifying text (screen saves, CT secondary captures, structured \
      reports). By default such records are excluded from the output \
      entirely.",
    default_value_t = false
  )]
  keep_identifiable_records: bool,

  #[arg(
    long,
    help = "Whether to strip all private (odd-group) data elements.",
    default_value_t = false
  )]
  strip_private_tags: bool,

  #[arg(
    long,
    help = "Whether every patient must have an entry in --new-ids. With \
      this flag, a patient absent from the table fails the whole run \
      instead of falling back to sequential allocation.",
    default_value_t = false
  )]
  require_new_ids: bool,

  #[arg(
    long,
    help = "Whether a patient folder without study/series/instance \
      structure fails the whole run. By default such folders are skipped \
      with a warning.",
    default_value_t = false
  )]
  strict: bool,

  #[arg(
    long,
    help = "Prefix of patient folder names, stripped from input folder \
      names to obtain the original patient key and prepended to pseudonyms \
      when renaming output folders.",
    default_value = DEFAULT_PATIENT_FOLDER_PREFIX
  )]
  patient_prefix: String,

  #[arg(
    long,
    help = "Root prefix of generated study/series/instance UIDs.",
    default_value = DEFAULT_UID_ROOT
  )]
  uid_root: String,
}

pub fn run(args: &AnonymizeArgs) -> Result<(), ()> {
  if !args.input_directory.is_dir() {
    eprintln!(
      "Error: '{}' is not a valid directory",
      args.input_directory.display()
    );
    return Err(());
  }

  if args.require_new_ids && args.new_ids.is_none() {
    eprintln!("Error: --require-new-ids needs --new-ids to be specified");
    return Err(());
  }

  let pseudonym_table = match &args.new_ids {
    Some(path) => Some(load_table::<String>(path)?),
    None => None,
  };

  let day_shift_table = match &args.day_shifts {
    Some(path) => Some(load_table::<i64>(path)?),
    None => None,
  };

  let config = DeidConfig {
    fuzz_birthdate: !args.no_fuzz_birthdate,
    fuzz_acquisition_dates: args.fuzz_acquisition_dates,
    day_shift_window: args.day_shift_window,
    delete_identifiable_records: !args.keep_identifiable_records,
    strip_private_tags: args.strip_private_tags,
    require_pseudonym_table: args.require_new_ids,
    strict_hierarchy: args.strict,
    patient_folder_prefix: args.patient_prefix.clone(),
    uid_root: args.uid_root.clone(),
    pseudonym_table,
    day_shift_table,
  };

  println!(
    "Anonymizing \"{}\" => \"{}\" …",
    args.input_directory.display(),
    args.output_directory.display()
  );

  match BatchAnonymizer::new(config)
    .run(&args.input_directory, &args.output_directory)
  {
    Ok(summary) => {
      print_summary(&summary);
      Ok(())
    }

    Err(e) => {
      e.print(&format!(
        "anonymizing \"{}\"",
        args.input_directory.display()
      ));
      Err(())
    }
  }
}

fn load_table<T: serde::de::DeserializeOwned>(
  path: &Path,
) -> Result<HashMap<String, T>, ()> {
  let file = File::open(path).map_err(|e| {
    eprintln!("Error: Failed opening \"{}\": {}", path.display(), e);
  })?;

  serde_json::from_reader(file).map_err(|e| {
    eprintln!("Error: Failed parsing \"{}\": {}", path.display(), e);
  })
}

fn print_summary(summary: &RunSummary) {
  println!();
  println!("-----");
  println!("Patients processed: {}", summary.patients_processed);
  println!("Records written:    {}", summary.records_written);
  println!("Records deleted:    {}", summary.records_deleted);
  println!("Records skipped:    {}", summary.records_skipped.len());

  for (path, reason) in &summary.records_skipped {
    println!("  \"{}\": {}", path.display(), reason);
  }

  if !summary.patients_skipped.is_empty() {
    println!("Patients skipped:   {}", summary.patients_skipped.len());

    for (path, reason) in &summary.patients_skipped {
      println!("  \"{}\": {}", path.display(), reason);
    }
  }
}
