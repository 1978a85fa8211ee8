//! Configuration management for start-test

mod defaults;
mod environment;
mod layout;
mod settings;

// Re-export main types
pub use defaults::{ProjectDefaults, CONFIG_FILE_NAME};
pub use environment::Environment;
pub use layout::Layout;
pub use settings::{FuturesMode, GraphReduction, Settings};
