//! The session log
//!
//! Every bracketed line the session produces, and every line of runner
//! output, goes through a [`LogSink`]. The real sink is [`Logger`], which
//! writes to stdout and to the per-process log file at the same time. Failing
//! to write the log is always an error: the log is the test result.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

pub trait LogSink {
    /// Write one message. Trailing whitespace is dropped.
    fn write(&mut self, msg: &str) -> Result<()>;

    fn blank(&mut self) -> Result<()> {
        self.write("")
    }

    /// Informational output for the console only, never logged
    fn console(&mut self, msg: &str) {
        println!("{msg}");
    }
}

/// In-memory sink, useful when the caller wants to inspect the lines
impl LogSink for Vec<String> {
    fn write(&mut self, msg: &str) -> Result<()> {
        self.push(msg.trim_end().to_string());
        Ok(())
    }
}

/// Tee writer for console and log file
pub struct Logger {
    path: PathBuf,
    file: Option<LineWriter<File>>,
    echo: bool,
}

impl Logger {
    /// Start a fresh log at `path`, truncating anything already there
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| open_error(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(LineWriter::new(file)),
            echo: true,
        })
    }

    /// Disable the console half of the tee
    pub fn without_console(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Close the file half so the log can be read back from disk
    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| write_error(&self.path, e))?;
        }
        Ok(())
    }

    /// Reopen the log file for appending after [`Logger::stop`]
    pub fn restart(&mut self) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)
                .map_err(|e| open_error(&self.path, e))?;
            self.file = Some(LineWriter::new(file));
        }
        Ok(())
    }
}

impl LogSink for Logger {
    fn write(&mut self, msg: &str) -> Result<()> {
        let msg = msg.trim_end();

        if self.echo {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{msg}")
                .map_err(|e| Error::LogError(format!("fatal error writing to stdout: {e}")))?;
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{msg}").map_err(|e| write_error(&self.path, e))?;
        }

        Ok(())
    }
}

fn open_error(path: &Path, err: io::Error) -> Error {
    Error::LogError(format!("cannot open log file {}: {err}", path.display()))
}

fn write_error(path: &Path, err: io::Error) -> Error {
    Error::LogError(format!("fatal error writing {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_write_stop_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("user.linux64.pid1.log");

        let mut logger = Logger::create(&path).unwrap().without_console();
        logger.write("[Starting Chapel regression tests - 240101.120000]   ").unwrap();
        logger.blank().unwrap();
        logger.stop().unwrap();
        assert!(!logger.is_open());

        // Lines written while stopped only reach the console
        logger.write("[not in file]").unwrap();

        logger.restart().unwrap();
        logger.write("[END]").unwrap();
        logger.stop().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "[Starting Chapel regression tests - 240101.120000]\n\n[END]\n"
        );
    }

    #[test]
    fn test_vec_sink_trims() {
        let mut lines: Vec<String> = Vec::new();
        lines.write("[Warning: x]\n").unwrap();
        lines.blank().unwrap();
        assert_eq!(lines, vec!["[Warning: x]".to_string(), String::new()]);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("x.log");
        assert!(matches!(Logger::create(&path), Err(Error::LogError(_))));
    }
}
