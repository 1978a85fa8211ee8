//! Invocation of the external test runner and cleaner

pub mod invoker;
pub mod process;

pub use invoker::{RunnerInvoker, CLEANER_NAME, RUNNER_NAME};
