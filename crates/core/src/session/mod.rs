//! One test session, from setup to exit code
//!
//! A session owns the settings, the temporary directory and the log. It
//! classifies the targets, runs setup and the test phases, then summarizes
//! the finished log. Every way out of a started session goes through the same
//! finish path, so the log is always published and the temporary directory
//! always removed.

mod artifacts;
mod phases;
mod setup;

pub use artifacts::{LogFiles, SUMMARY_SUFFIX};
pub use setup::{prepare_environment, GraphPlan, PerfPlan, RUN_DATE_FORMAT};

use crate::{
    config::{Environment, Layout, ProjectDefaults, Settings},
    context::{RunContext, ToolchainEnv},
    error::{Error, Result},
    log::{LogSink, Logger},
    runner::process,
    summary::{RunSummary, Summarizer},
};
use chrono::Local;
use phases::Phases;
use setup::Setup;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Process exit codes
pub mod exit_code {
    /// No failures, or a clean-only run
    pub const SUCCESS: i32 = 0;
    /// A prerequisite such as the toolchain home is missing
    pub const ENVIRONMENT: i32 = 1;
    /// At least one failure was logged
    pub const FAILURES: i32 = 2;
    /// None of the given targets exist
    pub const INVALID_TARGETS: i32 = 3;
}

/// A file or directory to test, resolved against the starting directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl TestTarget {
    /// Resolve `arg` against `cwd`, dropping `.` and `..` components
    /// without following symlinks
    pub fn classify(arg: &Path, cwd: &Path) -> Option<Self> {
        let path = normalize(&cwd.join(arg));
        if path.is_dir() {
            Some(TestTarget::Directory(path))
        } else if path.is_file() {
            Some(TestTarget::File(path))
        } else {
            None
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TestTarget::File(path) | TestTarget::Directory(path) => path,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Result of a finished session
#[derive(Debug, Clone)]
pub struct Outcome {
    pub exit_code: i32,
    /// Absent for clean-only runs and runs that never started
    pub summary: Option<RunSummary>,
    pub log_file: PathBuf,
    pub summary_file: PathBuf,
}

/// Temporary directory for the runners, removed only if the session made it
enum ScratchDir {
    Owned(TempDir),
    Given(PathBuf),
}

impl ScratchDir {
    fn path(&self) -> &Path {
        match self {
            ScratchDir::Owned(dir) => dir.path(),
            ScratchDir::Given(path) => path,
        }
    }

    fn close(self) -> Result<()> {
        match self {
            ScratchDir::Owned(dir) => Ok(dir.close()?),
            ScratchDir::Given(_) => Ok(()),
        }
    }
}

pub struct Session {
    settings: Settings,
    env: Environment,
    cwd: PathBuf,
    layout: Layout,
    toolchain: ToolchainEnv,
    files: LogFiles,
}

impl Session {
    /// Resolve where everything lives and what the options mean. Fails with
    /// `Error::EnvironmentError` when the toolchain home or log directories
    /// are unusable.
    pub fn new(mut settings: Settings, mut env: Environment, cwd: &Path) -> Result<Self> {
        prepare_environment(&mut env);

        let layout = Layout::discover(&env, settings.test_root.as_deref(), cwd)?;
        debug!("Using layout {:?}", layout);

        if let Some(defaults) = ProjectDefaults::discover(cwd)? {
            info!("Applying project defaults");
            settings.apply_defaults(defaults);
        }
        settings.apply_environment(&env);
        settings.normalize();

        let toolchain = ToolchainEnv::query(&layout.util_dir, &env).unwrap_or_else(|err| {
            warn!("printchplenv unavailable, using the environment: {}", err);
            ToolchainEnv::from_environment(&env)
        });

        let files = LogFiles::resolve(
            &layout.logs_dir,
            &user_name(&env),
            toolchain.target_platform(),
            std::process::id(),
            settings.log_file.as_deref(),
            cwd,
        );

        Ok(Self {
            settings,
            env,
            cwd: cwd.to_path_buf(),
            layout,
            toolchain,
            files,
        })
    }

    /// Test `targets`, or the default tree when there are none
    pub fn run(self, targets: &[PathBuf]) -> Result<Outcome> {
        let scratch = self.scratch_dir()?;
        self.files.prepare()?;
        let mut logger = Logger::create(&self.files.tmp_log_file)?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut had_invalid = false;
        for target in targets {
            match TestTarget::classify(target, &self.cwd) {
                Some(TestTarget::File(path)) => files.push(path),
                Some(TestTarget::Directory(path)) => dirs.push(path),
                None => {
                    logger.write(&format!(
                        "[Error: {} is not a valid file or directory]",
                        target.display()
                    ))?;
                    had_invalid = true;
                }
            }
        }

        if had_invalid && files.is_empty() && dirs.is_empty() {
            logger.stop()?;
            self.cleanup(scratch)?;
            return Ok(self.outcome(exit_code::INVALID_TARGETS, None));
        }

        let context = RunContext::new(
            self.env.clone(),
            &self.layout.util_dir,
            scratch.path(),
            &self.cwd,
        );
        match self.execute(context, files, dirs, &mut logger) {
            Ok(()) => {}
            Err(Error::Fatal(msg)) => logger.write(&format!("[Error: {msg}]"))?,
            Err(err) => {
                let _ = logger.stop();
                let _ = self.cleanup(scratch);
                return Err(err);
            }
        }

        self.finish(&mut logger, scratch)
    }

    fn execute(
        &self,
        context: RunContext,
        files: Vec<PathBuf>,
        mut dirs: Vec<PathBuf>,
        log: &mut dyn LogSink,
    ) -> Result<()> {
        let (context, plan) = Setup::new(
            &self.settings,
            &self.layout,
            &self.toolchain,
            &self.files,
            &self.cwd,
            context,
        )
        .run(log)?;

        if files.is_empty() && dirs.is_empty() {
            setup::generate_spec_tests(&self.settings, &self.layout, &self.cwd, &context, log)?;
            if self.cwd == self.layout.home {
                dirs.push(self.layout.test_dir.clone());
            } else {
                dirs.push(self.cwd.clone());
            }
        }

        log.write(&format!("[tests: \"{}\"]", join_display(&files)))?;
        if self.settings.recurse {
            log.write(&format!("[directories: \"{}\"]", join_display(&dirs)))?;
        } else {
            log.write(&format!(
                "[directories: (nonrecursive): \"{}\"]",
                join_display(&dirs)
            ))?;
        }

        setup::log_toolchain_environment(&context, log)?;

        Phases::new(&self.settings, &self.layout, &context, &plan).run(&files, &dirs, log)
    }

    /// Summarize, publish the log, clean up and pick the exit code
    fn finish(&self, logger: &mut Logger, scratch: ScratchDir) -> Result<Outcome> {
        let summary = if self.settings.clean_only {
            logger.write("[Summary: CLEAN ONLY]")?;
            None
        } else {
            Some(self.summarize(logger)?)
        };

        logger.blank()?;
        logger.stop()?;
        self.cleanup(scratch)?;

        if self.settings.junit_xml {
            self.junit_report();
        }

        let failed = summary.as_ref().is_some_and(RunSummary::has_failures);
        let code = if self.settings.clean_only || !failed {
            exit_code::SUCCESS
        } else {
            exit_code::FAILURES
        };
        Ok(self.outcome(code, summary))
    }

    fn summarize(&self, logger: &mut Logger) -> Result<RunSummary> {
        let date = Local::now().format(RUN_DATE_FORMAT).to_string();
        logger.write(&format!("[Done with tests - {date}]"))?;
        logger.write(&format!("[Log file: {} ]", self.files.log_file.display()))?;
        logger.blank()?;
        logger.stop()?;

        let text = fs::read_to_string(&self.files.tmp_log_file)?;
        let summary = Summarizer::new(self.settings.success_marker())?.summarize(&text);

        // Written while the file is closed, so it only reaches the console
        if summary.skipped_stdin > 0 {
            logger.write(&format!(
                "[Skipped {} tests with .stdin input]",
                summary.skipped_stdin
            ))?;
        }

        let rendered = summary.render(&date);
        logger.restart()?;
        logger.write(&rendered)?;
        fs::write(&self.files.tmp_summary_file, &rendered)?;

        Ok(summary)
    }

    fn scratch_dir(&self) -> Result<ScratchDir> {
        if let Some(dir) = self.env.get_non_empty("CHPL_TEST_TMP_DIR") {
            return Ok(ScratchDir::Given(PathBuf::from(dir)));
        }
        let dir = tempfile::Builder::new()
            .prefix("chplTestTmpDir.")
            .tempdir()?;
        debug!("Created {}", dir.path().display());
        Ok(ScratchDir::Owned(dir))
    }

    fn cleanup(&self, scratch: ScratchDir) -> Result<()> {
        self.files.publish()?;
        scratch.close()
    }

    /// Convert the published log into a jUnit XML report. Failures are
    /// reported on the console only.
    fn junit_report(&self) {
        println!("[Generating jUnit XML report]");

        let mut cmd = Command::new(
            self.layout
                .test_util("convert_start_test_log_to_junit_xml.py"),
        );
        cmd.arg(format!("--start-test-log={}", self.files.log_file.display()));
        if let Some(file) = &self.settings.junit_xml_file {
            cmd.arg(format!("--junit-xml={}", self.cwd.join(file).display()));
        }
        if let Some(prefix) = &self.settings.junit_remove_prefix {
            cmd.arg(format!("--remove-prefix={prefix}"));
        } else if let Some(root) = &self.settings.test_root {
            cmd.arg(format!("--remove-prefix={}", root.display()));
        }
        cmd.env_clear().envs(self.env.iter());

        if let Err(err) = process::capture(&mut cmd) {
            warn!("jUnit conversion failed: {}", err);
            println!("[ERROR generating jUnit XML report]");
        }
    }

    fn outcome(&self, exit_code: i32, summary: Option<RunSummary>) -> Outcome {
        Outcome {
            exit_code,
            summary,
            log_file: self.files.log_file.clone(),
            summary_file: self.files.summary_file.clone(),
        }
    }
}

/// Login name the same way the log file has always been named
fn user_name(env: &Environment) -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|key| env.get_non_empty(key))
        .unwrap_or("unknown")
        .to_string()
}

fn join_display(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_targets() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.chpl"), "").unwrap();

        assert_eq!(
            TestTarget::classify(Path::new("a.chpl"), temp_dir.path()),
            Some(TestTarget::File(temp_dir.path().join("a.chpl")))
        );
        assert_eq!(
            TestTarget::classify(Path::new("."), temp_dir.path())
                .map(|t| matches!(t, TestTarget::Directory(_))),
            Some(true)
        );
        assert_eq!(
            TestTarget::classify(Path::new("."), temp_dir.path())
                .unwrap()
                .path()
                .as_os_str(),
            temp_dir.path().as_os_str()
        );
        assert_eq!(TestTarget::classify(Path::new("nope"), temp_dir.path()), None);
    }

    #[test]
    fn test_normalize_is_lexical() {
        assert_eq!(
            normalize(Path::new("/work/t/sub/../sub/./a.chpl")).as_os_str(),
            "/work/t/sub/a.chpl"
        );
        assert_eq!(normalize(Path::new("/work/t/sub/..")).as_os_str(), "/work/t");
        assert_eq!(normalize(Path::new("/..")).as_os_str(), "/");
    }

    #[test]
    fn test_user_name_order() {
        let env: Environment = [("USER", "bob"), ("LOGNAME", ""), ("USERNAME", "carol")]
            .into_iter()
            .collect();
        assert_eq!(user_name(&env), "bob");
        assert_eq!(user_name(&Environment::default()), "unknown");
    }

    #[test]
    fn test_join_display() {
        let paths = vec![PathBuf::from("/a"), PathBuf::from("/b c")];
        assert_eq!(join_display(&paths), "/a /b c");
    }
}
