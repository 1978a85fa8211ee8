//! start-test - Regression test orchestration for a compiler test tree
//!
//! This crate provides functionality to:
//! - Walk a test tree and decide which directories hold runnable tests
//! - Honor skip markers and conditional skip scripts
//! - Drive the per-directory runner and cleaner with a controlled environment
//! - Produce a session log and summarize it into pass/fail counts
pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod perf;
pub mod runner;
pub mod session;
pub mod skip;
pub mod summary;
pub mod walker;

// Re-export commonly used types and traits
pub use error::{Error, Result};

// Re-export main API components
pub use config::{Environment, FuturesMode, GraphReduction, Layout, ProjectDefaults, Settings};
pub use context::{RunContext, ToolchainEnv};
pub use log::{LogSink, Logger};
pub use session::{exit_code, Outcome, Session, TestTarget};
pub use skip::{SkipDirective, SkipEvaluator};
pub use summary::{RunSummary, Summarizer, SuccessMarker};
pub use walker::{DirectoryWalker, NodeHandler, RunMode, WalkOptions};
