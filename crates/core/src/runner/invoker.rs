use crate::{
    context::{RunContext, ScopedEnv},
    error::{Error, Result},
    log::LogSink,
    runner::process,
};
use chrono::{DateTime, FixedOffset, Local};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Name of the runner, both the shared one and a directory-local override
pub const RUNNER_NAME: &str = "sub_test";
pub const CLEANER_NAME: &str = "sub_clean";

/// Timestamp format of `[Starting ...]` lines, up to the zone
pub const START_DATE_FORMAT: &str = "%a %b %d %H:%M:%S";

/// Runs `sub_test` and `sub_clean` for one directory or one file at a time
pub struct RunnerInvoker<'a> {
    context: &'a RunContext,
    progress: bool,
}

impl<'a> RunnerInvoker<'a> {
    pub fn new(context: &'a RunContext) -> Self {
        Self {
            context,
            progress: false,
        }
    }

    /// Report each single test on stderr as it starts
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// The directory's own executable `sub_test` if it has one, else the
    /// shared runner
    pub fn resolve_runner(&self, dir: &Path) -> PathBuf {
        let local = dir.join(RUNNER_NAME);
        if process::is_executable(&local) {
            local
        } else {
            self.context.test_util(RUNNER_NAME)
        }
    }

    /// Run the tests of `dir`, or only `single_file` inside it, streaming the
    /// runner's output to `log`. Returns the runner's exit code.
    ///
    /// A runner that cannot be executed is fatal for the whole session.
    pub fn invoke(
        &self,
        dir: &Path,
        single_file: Option<&Path>,
        log: &mut dyn LogSink,
    ) -> Result<i32> {
        log.blank()?;

        let scope = match single_file {
            Some(file) => {
                log.write(&format!(
                    "[Working on file {}]",
                    self.context.display_path(file)
                ))?;
                self.context.single_test(&file_name(file))
            }
            None => self.context.scoped(),
        };

        let runner = self.resolve_runner(dir);
        if !process::is_executable(&runner) {
            return Err(Error::Fatal(format!(
                "Cannot find or execute runner: {}",
                runner.display()
            )));
        }

        if self.progress {
            if let Some(file) = single_file {
                eprintln!("Testing {} ... ", file.display());
            }
        }

        log.write(&format!("[Starting {} {}]", runner.display(), now()))?;

        let mut cmd = Command::new(&runner);
        cmd.arg(self.context.compiler());
        in_directory(&mut cmd, dir, &scope);

        // A runner that passed the permission check can still fail to start,
        // e.g. with a missing interpreter
        let code = match process::run_and_log(cmd, log) {
            Ok(code) => code,
            Err(Error::CommandFailed { output, .. }) => {
                return Err(Error::Fatal(format!(
                    "Cannot find or execute runner: {} ({})",
                    runner.display(),
                    output
                )));
            }
            Err(err) => return Err(err),
        };
        info!("{} in {} exited with {}", RUNNER_NAME, dir.display(), code);
        Ok(code)
    }

    /// Remove build products in `dir`, for all tests or only `test`. A
    /// failing cleaner is logged and otherwise ignored.
    pub fn clean(&self, dir: &Path, test: Option<&str>, log: &mut dyn LogSink) -> Result<()> {
        let cleaner = self.context.test_util(CLEANER_NAME);
        let mut cmd = Command::new(&cleaner);

        if let Some(test) = test {
            log.write(&format!("[Starting {} {} {}]", cleaner.display(), test, now()))?;
            cmd.arg(test);
        }
        in_directory(&mut cmd, dir, &self.context.scoped());

        match process::capture(&mut cmd) {
            Ok(output) => log.write(&output),
            Err(err) => {
                debug!("{} failed in {}: {}", CLEANER_NAME, dir.display(), err);
                log.write("[Error: sub_clean error]")
            }
        }
    }
}

fn in_directory(cmd: &mut Command, dir: &Path, scope: &ScopedEnv<'_>) {
    scope.apply(cmd);
    cmd.current_dir(dir).env("PWD", dir);
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn now() -> String {
    start_stamp(&DateTime::<FixedOffset>::from(Local::now()))
}

/// chrono knows no zone abbreviations, so the zone is written as `UTC` or
/// `UTC+hh:mm`
fn start_stamp(time: &DateTime<FixedOffset>) -> String {
    let zone = match time.offset().local_minus_utc() {
        0 => "UTC".to_string(),
        _ => time.format("UTC%:z").to_string(),
    };
    format!("{} {} {}", time.format(START_DATE_FORMAT), zone, time.format("%Y"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Shared runner echoes its argument and the single test it was given,
    /// then exits with the code stored in `exit_code` when present
    fn fixture() -> (TempDir, RunContext) {
        let temp_dir = TempDir::new().unwrap();
        let util = temp_dir.path().join("util");
        fs::create_dir_all(util.join("test")).unwrap();

        script(
            &util.join("test").join(RUNNER_NAME),
            "echo \"compiler=$1\"\n\
             echo \"onetest=${CHPL_ONETEST:-unset}\"\n\
             echo '[Error matching x]' 1>&2\n\
             [ -f exit_code ] && exit \"$(cat exit_code)\"\n\
             exit 0\n",
        );
        script(
            &util.join("test").join(CLEANER_NAME),
            "[ -f fail_clean ] && exit 1\necho \"cleaned ${1:-all}\"\n",
        );

        let mut context = RunContext::new(
            Environment::from_process(),
            &util,
            temp_dir.path(),
            temp_dir.path(),
        );
        context.set_compiler(Path::new("/opt/chpl"));
        (temp_dir, context)
    }

    fn test_dir(root: &Path) -> PathBuf {
        let dir = root.join("tests").join("d");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_invoke_directory_streams_output() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());

        let mut lines: Vec<String> = Vec::new();
        let code = RunnerInvoker::new(&context)
            .invoke(&dir, None, &mut lines)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(lines[0], "");
        assert!(lines[1].starts_with("[Starting "));
        assert!(lines[1].contains("util/test/sub_test"));
        assert_eq!(
            &lines[2..],
            &["compiler=/opt/chpl", "onetest=unset", "[Error matching x]"]
        );
    }

    #[test]
    fn test_invoke_single_file_scopes_one_test() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        let file = dir.join("hello.chpl");
        fs::write(&file, "").unwrap();
        fs::write(dir.join("exit_code"), "3").unwrap();

        let mut lines: Vec<String> = Vec::new();
        let invoker = RunnerInvoker::new(&context);
        let code = invoker.invoke(&dir, Some(&file), &mut lines).unwrap();

        assert_eq!(code, 3);
        assert_eq!(lines[1], "[Working on file tests/d/hello.chpl]");
        assert!(lines.contains(&"onetest=hello.chpl".to_string()));

        // The next directory-wide invocation sees no single test
        let mut next: Vec<String> = Vec::new();
        invoker.invoke(&dir, None, &mut next).unwrap();
        assert!(next.contains(&"onetest=unset".to_string()));
        assert_eq!(context.get("CHPL_ONETEST"), None);
    }

    #[test]
    fn test_local_runner_preferred() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        script(&dir.join(RUNNER_NAME), "echo local\n");

        let invoker = RunnerInvoker::new(&context);
        assert_eq!(invoker.resolve_runner(&dir), dir.join(RUNNER_NAME));

        let mut lines: Vec<String> = Vec::new();
        invoker.invoke(&dir, None, &mut lines).unwrap();
        assert_eq!(lines.last().map(String::as_str), Some("local"));
    }

    #[test]
    fn test_non_executable_local_runner_is_ignored() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        fs::write(dir.join(RUNNER_NAME), "echo local\n").unwrap();

        assert_eq!(
            RunnerInvoker::new(&context).resolve_runner(&dir),
            context.test_util(RUNNER_NAME)
        );
    }

    #[test]
    fn test_missing_runner_is_fatal() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        fs::remove_file(context.test_util(RUNNER_NAME)).unwrap();

        let mut lines: Vec<String> = Vec::new();
        let err = RunnerInvoker::new(&context)
            .invoke(&dir, None, &mut lines)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_runner_that_cannot_start_is_fatal() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        let local = dir.join(RUNNER_NAME);
        fs::write(&local, "#!/nonexistent/interp\n").unwrap();
        fs::set_permissions(&local, fs::Permissions::from_mode(0o755)).unwrap();

        let mut lines: Vec<String> = Vec::new();
        let err = RunnerInvoker::new(&context)
            .invoke(&dir, None, &mut lines)
            .unwrap_err();
        match err {
            Error::Fatal(msg) => {
                assert!(msg.starts_with(&format!("Cannot find or execute runner: {}", local.display())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_start_stamp_names_the_zone() {
        use chrono::TimeZone;

        let utc = FixedOffset::east_opt(0).unwrap();
        let time = utc.with_ymd_and_hms(2024, 3, 5, 14, 2, 9).unwrap();
        assert_eq!(start_stamp(&time), "Tue Mar 05 14:02:09 UTC 2024");

        let india = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let time = india.with_ymd_and_hms(2024, 3, 5, 14, 2, 9).unwrap();
        assert_eq!(start_stamp(&time), "Tue Mar 05 14:02:09 UTC+05:30 2024");
    }

    #[test]
    fn test_clean_logs_output_or_error() {
        let (temp_dir, context) = fixture();
        let dir = test_dir(temp_dir.path());
        let invoker = RunnerInvoker::new(&context);

        let mut lines: Vec<String> = Vec::new();
        invoker.clean(&dir, Some("hello.chpl"), &mut lines).unwrap();
        assert!(lines[0].starts_with("[Starting "));
        assert!(lines[0].contains("sub_clean hello.chpl"));
        assert_eq!(lines[1], "cleaned hello.chpl");

        fs::write(dir.join("fail_clean"), "").unwrap();
        let mut lines: Vec<String> = Vec::new();
        invoker.clean(&dir, None, &mut lines).unwrap();
        assert_eq!(lines, vec!["[Error: sub_clean error]"]);
    }
}
