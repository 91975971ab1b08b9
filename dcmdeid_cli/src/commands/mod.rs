pub mod anonymize_command;
