//! Entry point for the dcmdeid CLI tool.

mod commands;

use clap::{Parser, Subcommand};

use commands::anonymize_command;

#[derive(Parser)]
#[command(
  name = "dcmdeid",
  bin_name = "dcmdeid",
  version = env!("CARGO_PKG_VERSION"),
  about = "dcmdeid de-identifies per-patient DICOM directory hierarchies",
  max_term_width = 80
)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  #[command(about = anonymize_command::ABOUT)]
  Anonymize(anonymize_command::AnonymizeArgs),
}

fn main() -> Result<(), ()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Anonymize(args) => anonymize_command::run(&args),
  }
}
