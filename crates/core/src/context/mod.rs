//! Environment handed to the external tools
pub mod run_context;
pub mod toolchain;

pub use run_context::{RunContext, ScopedEnv, ONE_TEST_VAR};
pub use toolchain::ToolchainEnv;
