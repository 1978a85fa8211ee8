use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of the summary file written next to a log
pub const SUMMARY_SUFFIX: &str = ".summary";

/// The log and summary a session produces.
///
/// By default the session writes to a per-process file and copies it to its
/// shared name only when finished, so concurrent sessions never interleave.
/// An explicit log file is written in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    pub log_file: PathBuf,
    pub tmp_log_file: PathBuf,
    pub summary_file: PathBuf,
    pub tmp_summary_file: PathBuf,
}

impl LogFiles {
    pub fn resolve(
        logs_dir: &Path,
        user: &str,
        platform: &str,
        pid: u32,
        explicit: Option<&Path>,
        cwd: &Path,
    ) -> Self {
        let (log_file, tmp_log_file) = match explicit {
            Some(path) => {
                let path = cwd.join(path);
                (path.clone(), path)
            }
            None => (
                logs_dir.join(format!("{user}.{platform}.log")),
                logs_dir.join(format!("{user}.{platform}.pid{pid}.log")),
            ),
        };

        Self {
            summary_file: with_suffix(&log_file, SUMMARY_SUFFIX),
            tmp_summary_file: with_suffix(&tmp_log_file, SUMMARY_SUFFIX),
            log_file,
            tmp_log_file,
        }
    }

    /// Check the log can be written and remove results of an earlier session
    pub fn prepare(&self) -> Result<()> {
        let dir = self.log_file.parent().unwrap_or(Path::new("."));
        if !dir.is_dir() {
            return Err(Error::EnvironmentError(format!(
                "[Permission denied for log_file directory: {}]",
                dir.display()
            )));
        }

        if self.log_file.is_file() {
            println!();
            println!(
                "[Removing log file with duplicate name {}]",
                self.log_file.display()
            );
            fs::remove_file(&self.log_file)?;
        }
        if self.summary_file.is_file() {
            fs::remove_file(&self.summary_file)?;
        }
        Ok(())
    }

    /// Move the per-process log and summary to their final names
    pub fn publish(&self) -> Result<()> {
        publish_one(&self.tmp_log_file, &self.log_file)?;
        publish_one(&self.tmp_summary_file, &self.summary_file)
    }
}

fn publish_one(from: &Path, to: &Path) -> Result<()> {
    if from != to && from.is_file() {
        debug!("Publishing {} as {}", from.display(), to.display());
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_names_use_pid() {
        let files = LogFiles::resolve(
            Path::new("/chpl/test/Logs"),
            "alice",
            "linux64",
            42,
            None,
            Path::new("/work"),
        );

        assert_eq!(files.log_file, PathBuf::from("/chpl/test/Logs/alice.linux64.log"));
        assert_eq!(
            files.tmp_log_file,
            PathBuf::from("/chpl/test/Logs/alice.linux64.pid42.log")
        );
        assert_eq!(
            files.summary_file,
            PathBuf::from("/chpl/test/Logs/alice.linux64.log.summary")
        );
        assert_eq!(
            files.tmp_summary_file,
            PathBuf::from("/chpl/test/Logs/alice.linux64.pid42.log.summary")
        );
    }

    #[test]
    fn test_explicit_log_is_written_in_place() {
        let files = LogFiles::resolve(
            Path::new("/chpl/test/Logs"),
            "alice",
            "linux64",
            42,
            Some(Path::new("out/run.log")),
            Path::new("/work"),
        );
        assert_eq!(files.log_file, PathBuf::from("/work/out/run.log"));
        assert_eq!(files.tmp_log_file, files.log_file);
    }

    #[test]
    fn test_prepare_and_publish() {
        let temp_dir = TempDir::new().unwrap();
        let files = LogFiles::resolve(temp_dir.path(), "u", "p", 7, None, temp_dir.path());

        fs::write(&files.log_file, "old").unwrap();
        fs::write(&files.summary_file, "old").unwrap();
        files.prepare().unwrap();
        assert!(!files.log_file.exists());
        assert!(!files.summary_file.exists());

        fs::write(&files.tmp_log_file, "log").unwrap();
        fs::write(&files.tmp_summary_file, "summary").unwrap();
        files.publish().unwrap();

        assert_eq!(fs::read_to_string(&files.log_file).unwrap(), "log");
        assert_eq!(fs::read_to_string(&files.summary_file).unwrap(), "summary");
        assert!(!files.tmp_log_file.exists());
        assert!(!files.tmp_summary_file.exists());
    }

    #[test]
    fn test_prepare_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let files = LogFiles::resolve(
            temp_dir.path(),
            "u",
            "p",
            7,
            Some(Path::new("missing/run.log")),
            temp_dir.path(),
        );
        assert!(matches!(files.prepare(), Err(Error::EnvironmentError(_))));
    }
}
