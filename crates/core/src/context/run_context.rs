use crate::config::Environment;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Variable naming the single test a runner invocation should handle
pub const ONE_TEST_VAR: &str = "CHPL_ONETEST";

/// Environment and derived paths shared by every runner invocation.
///
/// Built by the session during setup and only ever borrowed immutably
/// afterwards. Per-invocation state lives in a [`ScopedEnv`].
#[derive(Debug, Clone)]
pub struct RunContext {
    env: Environment,
    util_dir: PathBuf,
    compiler: PathBuf,
    tmp_dir: PathBuf,
    invocation_dir: PathBuf,
}

impl RunContext {
    pub fn new(env: Environment, util_dir: &Path, tmp_dir: &Path, invocation_dir: &Path) -> Self {
        let mut context = Self {
            env,
            util_dir: util_dir.to_path_buf(),
            compiler: PathBuf::new(),
            tmp_dir: tmp_dir.to_path_buf(),
            invocation_dir: invocation_dir.to_path_buf(),
        };
        context.set("CHPL_TEST_UTIL_DIR", util_dir.to_string_lossy());
        context.set("CHPL_TEST_TMP_DIR", tmp_dir.to_string_lossy());
        context.env.remove(ONE_TEST_VAR);
        context
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set(key, value);
    }

    pub fn set_compiler(&mut self, compiler: &Path) {
        self.compiler = compiler.to_path_buf();
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn util_dir(&self) -> &Path {
        &self.util_dir
    }

    /// Path of a helper script shipped in `<util>/test`
    pub fn test_util(&self, name: &str) -> PathBuf {
        self.util_dir.join("test").join(name)
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// A copy of this context with extra variables, for one phase of a run
    pub fn with_vars<'a, I>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut context = self.clone();
        for (key, value) in vars {
            context.set(key, value);
        }
        context
    }

    /// View of the context for a directory-wide invocation
    pub fn scoped(&self) -> ScopedEnv<'_> {
        ScopedEnv {
            base: self,
            one_test: None,
        }
    }

    /// View of the context with [`ONE_TEST_VAR`] naming `test`
    pub fn single_test(&self, test: &str) -> ScopedEnv<'_> {
        ScopedEnv {
            base: self,
            one_test: Some(test.to_string()),
        }
    }

    /// `path` relative to the directory the session was started from, when
    /// it lies below it
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.invocation_dir)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// The environment of one invocation.
///
/// Borrows the shared context, so the transient single-test variable cannot
/// outlive the invocation that created it or leak into the next one.
#[derive(Debug)]
pub struct ScopedEnv<'a> {
    base: &'a RunContext,
    one_test: Option<String>,
}

impl ScopedEnv<'_> {
    pub fn current_test(&self) -> Option<&str> {
        self.one_test.as_deref()
    }

    /// Replace the command's environment with this view
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        cmd.envs(self.base.env.iter());
        if let Some(test) = &self.one_test {
            cmd.env(ONE_TEST_VAR, test);
        }
    }
}
