//! The toolchain's own description of its configuration

use crate::{
    config::Environment,
    error::Result,
    runner::process,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Settings reported by `printchplenv`, with the process environment as a
/// fallback for anything it does not mention
#[derive(Debug, Clone, Default)]
pub struct ToolchainEnv {
    values: BTreeMap<String, String>,
}

impl ToolchainEnv {
    /// Ask `<util>/printchplenv` for the full configuration
    pub fn query(util_dir: &Path, env: &Environment) -> Result<Self> {
        let mut cmd = Command::new(util_dir.join("printchplenv"));
        cmd.args(["--all", "--internal", "--simple"])
            .env_clear()
            .envs(env.iter());
        let output = process::capture(&mut cmd)?;
        Ok(Self::parse(&output).with_fallback(env))
    }

    /// Only what is already exported in the environment
    pub fn from_environment(env: &Environment) -> Self {
        Self::default().with_fallback(env)
    }

    /// Parse `KEY=VALUE` lines, ignoring everything else
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .filter_map(|line| line.trim().split_once('='))
            .filter(|(key, _)| key.starts_with("CHPL_"))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self { values }
    }

    fn with_fallback(mut self, env: &Environment) -> Self {
        for (key, value) in env.iter().filter(|(k, _)| k.starts_with("CHPL_")) {
            self.values
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// First of `keys` that is set, or `"none"`
    fn first_of(&self, keys: &[&str]) -> &str {
        keys.iter().find_map(|key| self.get(key)).unwrap_or("none")
    }

    pub fn comm(&self) -> &str {
        self.first_of(&["CHPL_COMM"])
    }

    pub fn comm_substrate(&self) -> &str {
        self.first_of(&["CHPL_COMM_SUBSTRATE"])
    }

    pub fn comm_segment(&self) -> &str {
        self.first_of(&["CHPL_GASNET_SEGMENT"])
    }

    pub fn launcher(&self) -> &str {
        self.first_of(&["CHPL_LAUNCHER"])
    }

    pub fn network_atomics(&self) -> &str {
        self.first_of(&["CHPL_NETWORK_ATOMICS"])
    }

    pub fn locale_model(&self) -> &str {
        self.first_of(&["CHPL_LOCALE_MODEL"])
    }

    pub fn llvm(&self) -> &str {
        self.first_of(&["CHPL_LLVM"])
    }

    pub fn tasks(&self) -> &str {
        self.first_of(&["CHPL_TASKS"])
    }

    pub fn target_mem(&self) -> &str {
        self.first_of(&["CHPL_TARGET_MEM", "CHPL_MEM"])
    }

    pub fn re2(&self) -> &str {
        self.first_of(&["CHPL_RE2"])
    }

    pub fn host_platform(&self) -> &str {
        self.first_of(&["CHPL_HOST_PLATFORM"])
    }

    pub fn target_platform(&self) -> &str {
        self.first_of(&["CHPL_TARGET_PLATFORM", "CHPL_HOST_PLATFORM"])
    }

    /// Subdirectory of `$CHPL_HOME/bin` holding the compiler
    pub fn host_bin_subdir(&self) -> String {
        match self.get("CHPL_HOST_BIN_SUBDIR") {
            Some(subdir) => subdir.to_string(),
            None => format!(
                "{}-{}",
                self.host_platform(),
                self.first_of(&["CHPL_HOST_ARCH"])
            ),
        }
    }
}
