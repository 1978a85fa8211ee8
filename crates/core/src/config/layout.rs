//! Resolution of the toolchain home, utility and test directories

use super::Environment;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Where everything lives for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// `$CHPL_HOME`
    pub home: PathBuf,
    /// Directory holding `test/sub_test`, `test/testEnv` and friends
    pub util_dir: PathBuf,
    /// Root of the test tree, used for auto-discovery and perf data
    pub test_dir: PathBuf,
    /// `<test_dir>/Logs`
    pub logs_dir: PathBuf,
    /// Whether tests can be generated from `$CHPL_HOME/spec`
    pub spec_tests: bool,
}

impl Layout {
    /// Locate the home and utility directories. Fails when the home is unset
    /// or not a directory.
    pub fn locate_home(env: &Environment) -> Result<(PathBuf, PathBuf)> {
        let home = env
            .get("CHPL_HOME")
            .map(PathBuf::from)
            .ok_or_else(|| Error::EnvironmentError("Error: CHPL_HOME is not set.".to_string()))?;
        if !home.is_dir() {
            return Err(Error::EnvironmentError(
                "Error: CHPL_HOME must be a legal directory.".to_string(),
            ));
        }

        let util_dir = match env.get("CHPL_TEST_UTIL_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let dir = home.join("util");
                if !dir.is_dir() {
                    return Err(Error::EnvironmentError(format!(
                        "Error: Cannot find {}.",
                        dir.display()
                    )));
                }
                dir
            }
        };

        Ok((home, util_dir))
    }

    /// Resolve the full layout, creating the Logs directory when needed
    pub fn discover(env: &Environment, test_root: Option<&Path>, cwd: &Path) -> Result<Self> {
        let (home, util_dir) = Self::locate_home(env)?;
        let mut spec_tests = home.join("spec").exists();

        let test_dir = match test_root {
            Some(root) => root.to_path_buf(),
            None => {
                let test = home.join("test");
                let examples = home.join("examples");
                if is_writable_dir(&test) {
                    test
                } else if is_writable_dir(&examples) {
                    spec_tests = false;
                    examples
                } else {
                    spec_tests = false;
                    cwd.to_path_buf()
                }
            }
        };

        if !is_writable_dir(&test_dir) {
            return Err(Error::EnvironmentError(format!(
                "Cannot write to test directory {}",
                test_dir.display()
            )));
        }

        let logs_dir = test_dir.join("Logs");
        if !logs_dir.is_dir() {
            fs::create_dir_all(&logs_dir)?;
        }
        if !is_writable_dir(&logs_dir) {
            return Err(Error::EnvironmentError(format!(
                "Cannot write to Logs directory {}",
                logs_dir.display()
            )));
        }

        Ok(Self {
            home,
            util_dir,
            test_dir,
            logs_dir,
            spec_tests,
        })
    }

    /// Path of a helper script shipped in `<util>/test`
    pub fn test_util(&self, name: &str) -> PathBuf {
        self.util_dir.join("test").join(name)
    }
}

fn is_writable_dir(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}
