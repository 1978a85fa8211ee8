pub mod run;

pub use run::{exit_code_for, run_command};
