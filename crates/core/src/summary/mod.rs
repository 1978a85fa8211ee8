//! Classification of the finished run log into a summary
//!
//! Runner output is free text. Outcomes are recovered by matching each line
//! against marker patterns: an ordered list of primary categories where the
//! first match wins, and an ordered list of secondary tags checked on every
//! line regardless of its primary category.

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;

/// Which success line counts as a passing test for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMarker {
    /// Execution output matched the expected output
    Matching,
    /// Compile-only runs
    Compiling,
    /// Graph-only runs
    Generating,
}

impl SuccessMarker {
    pub fn for_run(graphs_only: bool, comp_only: bool) -> Self {
        if graphs_only {
            SuccessMarker::Generating
        } else if comp_only {
            SuccessMarker::Compiling
        } else {
            SuccessMarker::Matching
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            SuccessMarker::Matching => r"\[Success matching",
            SuccessMarker::Compiling => r"\[Success compiling",
            SuccessMarker::Generating => r"\[Success generating",
        }
    }
}

/// Primary category of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Error,
    Suppression,
    Future,
    Warning,
    Success,
}

/// Secondary tag of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    PassingSuppression,
    PassingFuture,
    SkippedStdin,
}

const ERROR_MARKER: &str = r"^\[Error";
const SUPPRESS_MARKER: &str = r"^Suppress";
const FUTURE_MARKER: &str = r"^Future";
const WARNING_MARKER: &str = r"^\[Warning";
const SKIP_STDIN_MARKER: &str = r"^\[Skipping test with .stdin input";

/// Counts and text blocks produced from one run log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub successes: usize,
    pub failures: usize,
    pub futures: usize,
    pub warnings: usize,
    pub passing_suppressions: usize,
    pub passing_futures: usize,
    pub skipped_stdin: usize,
    pub failure_lines: String,
    pub suppression_lines: String,
    pub future_lines: String,
    pub warning_lines: String,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failures > 0
    }

    /// The summary block written to the log and the `.summary` file
    pub fn render(&self, date: &str) -> String {
        let mut out = format!("[Test Summary - {date}]\n");
        out.push_str(&self.failure_lines);
        out.push_str(&self.suppression_lines);
        out.push_str(&self.future_lines);
        out.push_str(&self.warning_lines);
        out.push_str(&format!(
            "[Summary: #Successes = {} | #Failures = {} | #Futures = {} | #Warnings = {} ]\n",
            self.successes, self.failures, self.futures, self.warnings
        ));
        out.push_str(&format!(
            "[Summary: #Passing Suppressions = {} | #Passing Futures = {} ]\n",
            self.passing_suppressions, self.passing_futures
        ));
        out.push_str("[END]\n");
        out
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} successes, {} failures, {} futures, {} warnings",
            self.successes, self.failures, self.futures, self.warnings
        )
    }
}

pub struct Summarizer {
    primary: Vec<(Category, Regex)>,
    secondary: Vec<(Tag, Regex)>,
}

impl Summarizer {
    pub fn new(marker: SuccessMarker) -> Result<Self> {
        let success = marker.pattern();

        let primary = vec![
            (Category::Error, compile(ERROR_MARKER)?),
            (Category::Suppression, compile(SUPPRESS_MARKER)?),
            (Category::Future, compile(FUTURE_MARKER)?),
            (Category::Warning, compile(WARNING_MARKER)?),
            (Category::Success, compile(&format!("^{success}"))?),
        ];

        let secondary = vec![
            (
                Tag::PassingSuppression,
                compile(&format!("{SUPPRESS_MARKER}.*{success}"))?,
            ),
            (
                Tag::PassingFuture,
                compile(&format!("{FUTURE_MARKER}.*{success}"))?,
            ),
            (Tag::SkippedStdin, compile(SKIP_STDIN_MARKER)?),
        ];

        Ok(Self { primary, secondary })
    }

    /// Primary category and secondary tag of a single line
    pub fn classify(&self, line: &str) -> (Option<Category>, Option<Tag>) {
        let category = self
            .primary
            .iter()
            .find(|(_, pattern)| pattern.is_match(line))
            .map(|(category, _)| *category);
        let tag = self
            .secondary
            .iter()
            .find(|(_, pattern)| pattern.is_match(line))
            .map(|(tag, _)| *tag);
        (category, tag)
    }

    /// Scan a complete log, preserving line order in the text blocks
    pub fn summarize(&self, log: &str) -> RunSummary {
        let mut summary = RunSummary::default();

        for line in log.lines() {
            let (category, tag) = self.classify(line);

            match category {
                Some(Category::Error) => {
                    push_line(&mut summary.failure_lines, line);
                    summary.failures += 1;
                }
                Some(Category::Suppression) => {
                    push_line(&mut summary.suppression_lines, line);
                }
                Some(Category::Future) => {
                    push_line(&mut summary.future_lines, line);
                    summary.futures += 1;
                }
                Some(Category::Warning) => {
                    push_line(&mut summary.warning_lines, line);
                    summary.warnings += 1;
                }
                Some(Category::Success) => summary.successes += 1,
                None => {}
            }

            match tag {
                Some(Tag::PassingSuppression) => summary.passing_suppressions += 1,
                Some(Tag::PassingFuture) => summary.passing_futures += 1,
                Some(Tag::SkippedStdin) => summary.skipped_stdin += 1,
                None => {}
            }
        }

        summary
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::ConfigError(format!("invalid marker pattern {pattern}: {e}")))
}

fn push_line(block: &mut String, line: &str) {
    block.push_str(line);
    block.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summarize(marker: SuccessMarker, log: &str) -> RunSummary {
        Summarizer::new(marker).unwrap().summarize(log)
    }

    #[test]
    fn test_one_error_one_success() {
        let log = "[Error compiling foo.chpl]\n[Success matching bar.chpl]\n";
        let summary = summarize(SuccessMarker::Matching, log);

        assert_eq!(summary.successes, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.futures, 0);
        assert_eq!(summary.warnings, 0);
        assert_eq!(summary.failure_lines, "[Error compiling foo.chpl]\n");
    }

    #[test]
    fn test_passing_future_counts_once_as_future() {
        let log = "Future foo ... [Success matching bar]\n";
        let summary = summarize(SuccessMarker::Matching, log);

        assert_eq!(summary.passing_futures, 1);
        assert_eq!(summary.futures, 1);
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.future_lines, log);
    }

    #[test]
    fn test_error_wins_over_success() {
        let summarizer = Summarizer::new(SuccessMarker::Matching).unwrap();
        let (category, _) = summarizer.classify("[Error matching x] [Success matching x]");
        assert_eq!(category, Some(Category::Error));
    }

    #[test]
    fn test_suppressions_collected_but_not_counted() {
        let log = "Suppress (known bug) [Success matching a.chpl]\n\
                   Suppress (known bug) [Error matching b.chpl]\n";
        let summary = summarize(SuccessMarker::Matching, log);

        assert_eq!(summary.passing_suppressions, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.successes, 0);
        assert_eq!(summary.suppression_lines, log);
    }

    #[test]
    fn test_markers_must_start_the_line() {
        let log = "  [Error indented]\nnote: [Warning inline]\n[Warning: real]\n";
        let summary = summarize(SuccessMarker::Matching, log);

        assert_eq!(summary.failures, 0);
        assert_eq!(summary.warnings, 1);
    }

    #[test]
    fn test_success_marker_depends_on_mode() {
        let log = "[Success compiling a.chpl]\n[Success matching b.chpl]\n\
                   [Success generating graphs for graph_files in /t in /html]\n";

        assert_eq!(summarize(SuccessMarker::Matching, log).successes, 1);
        assert_eq!(summarize(SuccessMarker::Compiling, log).successes, 1);
        assert_eq!(summarize(SuccessMarker::Generating, log).successes, 1);
    }

    #[test]
    fn test_skipped_stdin() {
        let log = "[Skipping test with .stdin input: a.chpl]\n\
                   [Skipping test with .stdin input: b.chpl]\n";
        let summary = summarize(SuccessMarker::Matching, log);
        assert_eq!(summary.skipped_stdin, 2);
        assert_eq!(summary.warnings, 0);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let log = "[Error x]\n[Warning y]\nFuture z\n[Success matching w]\nplain text\n";
        let summarizer = Summarizer::new(SuccessMarker::Matching).unwrap();
        assert_eq!(summarizer.summarize(log), summarizer.summarize(log));
    }

    #[test]
    fn test_render() {
        let log = "[Error matching a.chpl]\n\
                   Suppress [Error matching s.chpl]\n\
                   Future (bug) f.chpl\n\
                   [Warning: w]\n\
                   [Success matching ok.chpl]\n";
        let rendered = summarize(SuccessMarker::Matching, log).render("240101.120000");

        assert_eq!(
            rendered,
            "[Test Summary - 240101.120000]\n\
             [Error matching a.chpl]\n\
             Suppress [Error matching s.chpl]\n\
             Future (bug) f.chpl\n\
             [Warning: w]\n\
             [Summary: #Successes = 1 | #Failures = 1 | #Futures = 1 | #Warnings = 1 ]\n\
             [Summary: #Passing Suppressions = 0 | #Passing Futures = 0 ]\n\
             [END]\n"
        );
    }
}
