//! Depth-first traversal of test directories
//!
//! Directories are visited in pre-order with children sorted by name. Each
//! directory gets exactly one skip verdict; a pruned directory's children are
//! dropped from the walk before they are ever read.

use crate::{
    context::RunContext,
    error::Result,
    log::LogSink,
    runner::{process, RUNNER_NAME},
    skip::{SkipDirective, SkipEvaluator, SkipReason},
};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Suffixes of files the runner knows how to test
pub const TEST_SUFFIXES: &[&str] = &[".chpl", ".test.c", ".ml-test.c", ".test.cpp", ".ml-test.cpp"];

/// Marker for directories that generate their tests before running them
pub const PRETEST_FILE: &str = "PRETEST";

/// What a pass over a directory tree does at each eligible directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run the directory's tests
    Execute,
    /// Run the directory's performance tests
    Performance,
    /// Generate graphs from earlier performance runs
    Graph,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Execute => "run",
            RunMode::Performance => "performance",
            RunMode::Graph => "graph",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub recurse: bool,
    /// Skip markers are ignored when only cleaning
    pub clean_only: bool,
    /// Suffix marking performance tests, without the leading dot
    pub perf_keys: String,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            clean_only: false,
            perf_keys: "perfkeys".to_string(),
        }
    }
}

/// Work done at each directory the walker selects
pub trait NodeHandler {
    fn handle(&mut self, dir: &Path, mode: RunMode, log: &mut dyn LogSink) -> Result<()>;
}

/// Tally of one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Directories logged as worked on
    pub visited: usize,
    /// Directories dropped together with their children
    pub pruned: usize,
    /// Directories whose own tests were skipped
    pub skipped: usize,
    /// Directories without anything to test
    pub empty: usize,
    /// Directories passed to the handler
    pub handled: usize,
    /// Directories that could not be entered
    pub inaccessible: usize,
}

pub struct DirectoryWalker<'a> {
    evaluator: SkipEvaluator<'a>,
    options: WalkOptions,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(context: &'a RunContext, options: WalkOptions) -> Self {
        Self {
            evaluator: SkipEvaluator::new(context),
            options,
        }
    }

    /// Walk the tree under `root`, handing every eligible directory to
    /// `handler`. Per-directory failures are logged and never stop the walk;
    /// only errors returned by the handler or the log do.
    pub fn walk(
        &self,
        root: &Path,
        mode: RunMode,
        handler: &mut dyn NodeHandler,
        log: &mut dyn LogSink,
    ) -> Result<WalkReport> {
        log.write(&format!("[Working from directory {}]", root.display()))?;

        let mut report = WalkReport::default();
        let max_depth = if self.options.recurse { usize::MAX } else { 0 };
        let mut entries = WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.file_type().is_dir());

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root);
                    warn!("Cannot read {}: {}", path.display(), err);
                    log.write(&cannot_enter(path))?;
                    report.inaccessible += 1;
                    continue;
                }
            };
            let dir = entry.path();

            if !is_accessible(dir) {
                log.write(&cannot_enter(dir))?;
                report.inaccessible += 1;
                entries.skip_current_dir();
                continue;
            }

            if in_dsym_bundle(dir) {
                debug!("Skipping debug symbol bundle {}", dir.display());
                entries.skip_current_dir();
                continue;
            }

            log.blank()?;
            log.write(&format!("[Working on directory {}]", dir.display()))?;
            report.visited += 1;

            if !self.options.clean_only {
                let verdict = self.evaluator.evaluate(dir);
                for line in &verdict.info {
                    log.console(line);
                }
                for warning in &verdict.warnings {
                    log.write(warning)?;
                }

                match verdict.directive {
                    SkipDirective::None => {}
                    SkipDirective::PruneSubtree(reason) => {
                        if reason == SkipReason::SkipifSibling {
                            if let Some(marker) = &verdict.marker {
                                log.write(&format!(
                                    "[Skipping directory and children based on .skipif environment settings in {}]",
                                    marker.display()
                                ))?;
                            }
                        }
                        debug!("Pruned {} ({})", dir.display(), reason);
                        report.pruned += 1;
                        entries.skip_current_dir();
                        continue;
                    }
                    SkipDirective::SkipSelfOnly(reason) => {
                        if reason == SkipReason::Skipif {
                            log.write("[Skipping directory based on SKIPIF environment settings]")?;
                        }
                        debug!("Skipped {} ({})", dir.display(), reason);
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            if mode == RunMode::Graph || self.has_tests(dir, mode) {
                handler.handle(dir, mode, log)?;
                report.handled += 1;
            } else {
                log.write(&format!("[No tests in directory {}]", dir.display()))?;
                report.empty += 1;
            }
        }

        Ok(report)
    }

    /// Whether `dir` holds anything the runner would test in `mode`
    pub fn has_tests(&self, dir: &Path, mode: RunMode) -> bool {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return false;
        };

        let perf_suffix = format!(".{}", self.options.perf_keys);
        let found = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .any(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                match mode {
                    RunMode::Performance => name.ends_with(&perf_suffix),
                    _ => {
                        name == PRETEST_FILE
                            || TEST_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
                    }
                }
            });

        // A local runner only counts for ordinary runs
        found || (mode == RunMode::Execute && process::is_executable(&dir.join(RUNNER_NAME)))
    }
}

fn cannot_enter(dir: &Path) -> String {
    format!("[Warning: Cannot cd into {} skipping directory]", dir.display())
}

fn in_dsym_bundle(dir: &Path) -> bool {
    dir.components()
        .any(|part| part.as_os_str().to_string_lossy().ends_with(".dSYM"))
}

/// Whether this process may enter and list `dir`. Looking up `dir/.` needs
/// search permission on `dir` itself.
fn is_accessible(dir: &Path) -> bool {
    dir.is_dir() && fs::metadata(dir.join(".")).is_ok() && fs::read_dir(dir).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        handled: Vec<(PathBuf, RunMode)>,
    }

    impl NodeHandler for Recorder {
        fn handle(&mut self, dir: &Path, mode: RunMode, log: &mut dyn LogSink) -> Result<()> {
            log.write(&format!("handled {}", dir.display()))?;
            self.handled.push((dir.to_path_buf(), mode));
            Ok(())
        }
    }

    fn fixture() -> (TempDir, RunContext, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let util = temp_dir.path().join("util");
        fs::create_dir_all(util.join("test")).unwrap();

        let helper = util.join("test").join("testEnv");
        fs::write(&helper, "#!/bin/sh\ncat \"$1\"\n").unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        let root = temp_dir.path().join("tests");
        fs::create_dir_all(&root).unwrap();

        let context = RunContext::new(
            Environment::from_process(),
            &util,
            temp_dir.path(),
            temp_dir.path(),
        );
        (temp_dir, context, root)
    }

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn walk(
        context: &RunContext,
        options: WalkOptions,
        root: &Path,
        mode: RunMode,
    ) -> (WalkReport, Recorder, Vec<String>) {
        let mut recorder = Recorder::default();
        let mut lines: Vec<String> = Vec::new();
        let report = DirectoryWalker::new(context, options)
            .walk(root, mode, &mut recorder, &mut lines)
            .unwrap();
        (report, recorder, lines)
    }

    #[test]
    fn test_notest_sibling_prunes_whole_subtree() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("t/sub/deep.chpl"), "");
        touch(&root.join("t.notest"), "");
        touch(&root.join("u/a.chpl"), "");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);

        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("u")]);
        assert_eq!(report.pruned, 1);
        assert!(!lines.iter().any(|l| l.contains("t/sub")));
    }

    #[test]
    fn test_skipif_skips_self_but_visits_children() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("d/SKIPIF"), "info\n1\n");
        touch(&root.join("d/own.chpl"), "");
        touch(&root.join("d/child/c.chpl"), "");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);

        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("d/child")]);
        assert_eq!(report.skipped, 1);
        assert!(lines.contains(&"[Skipping directory based on SKIPIF environment settings]".to_string()));
        assert!(lines.contains(&format!("[Working on directory {}]", root.join("d/child").display())));
    }

    #[test]
    fn test_skipif_sibling_logs_marker() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("t/a.chpl"), "");
        touch(&root.join("t.skipif"), "True\n");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);

        assert!(recorder.handled.is_empty());
        assert_eq!(report.pruned, 1);
        assert!(lines.contains(&format!(
            "[Skipping directory and children based on .skipif environment settings in {}]",
            root.join("t.skipif").display()
        )));
    }

    #[test]
    fn test_sorted_preorder_and_no_tests() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("b/x.test.c"), "");
        touch(&root.join("a/z/PRETEST"), "");
        touch(&root.join("a/readme.txt"), "");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);

        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("a/z"), root.join("b")]);
        assert_eq!(report.visited, 4);
        assert_eq!(report.empty, 2);
        assert_eq!(lines[0], format!("[Working from directory {}]", root.display()));
        assert!(lines.contains(&format!("[No tests in directory {}]", root.join("a").display())));
    }

    #[test]
    fn test_no_recurse_visits_only_root() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("top.chpl"), "");
        touch(&root.join("sub/inner.chpl"), "");

        let options = WalkOptions {
            recurse: false,
            ..Default::default()
        };
        let (report, recorder, _) = walk(&context, options, &root, RunMode::Execute);

        assert_eq!(report.visited, 1);
        assert_eq!(recorder.handled, vec![(root.clone(), RunMode::Execute)]);
    }

    #[test]
    fn test_dsym_bundles_are_silent() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("prog.dSYM/Contents/x.chpl"), "");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);

        assert_eq!(report.visited, 1);
        assert!(recorder.handled.is_empty());
        assert!(!lines.iter().any(|l| l.contains("dSYM")));
    }

    #[test]
    fn test_performance_mode_uses_perf_keys_and_ignores_local_runner() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("p/bench.perfkeys"), "");
        touch(&root.join("p/bench.chpl"), "");
        touch(&root.join("q/only.chpl"), "");
        let runner = root.join("r").join(RUNNER_NAME);
        touch(&runner, "#!/bin/sh\n");
        fs::set_permissions(&runner, fs::Permissions::from_mode(0o755)).unwrap();

        let (_, recorder, _) = walk(&context, WalkOptions::default(), &root, RunMode::Performance);
        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("p")]);

        let (_, recorder, _) = walk(&context, WalkOptions::default(), &root, RunMode::Execute);
        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("p"), root.join("q"), root.join("r")]);
    }

    #[test]
    fn test_graph_mode_handles_every_unskipped_directory() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("g/NOTEST"), "");
        touch(&root.join("h/readme"), "");

        let (report, recorder, _) = walk(&context, WalkOptions::default(), &root, RunMode::Graph);

        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.clone(), root.join("h")]);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_clean_only_ignores_markers() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("t/a.chpl"), "");
        touch(&root.join("t.notest"), "");

        let options = WalkOptions {
            clean_only: true,
            ..Default::default()
        };
        let (_, recorder, _) = walk(&context, options, &root, RunMode::Execute);
        assert_eq!(recorder.handled.len(), 1);
    }

    #[test]
    fn test_missing_root_is_a_warning() {
        let (_temp_dir, context, root) = fixture();
        let missing = root.join("missing");

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &missing, RunMode::Execute);

        assert_eq!(report.inaccessible, 1);
        assert!(recorder.handled.is_empty());
        assert_eq!(
            lines[1],
            format!("[Warning: Cannot cd into {} skipping directory]", missing.display())
        );
    }

    #[test]
    fn test_unsearchable_directory_is_skipped_with_siblings_kept() {
        let (_temp_dir, context, root) = fixture();
        touch(&root.join("a/one.chpl"), "");
        touch(&root.join("c/three.chpl"), "");
        let locked = root.join("b");
        fs::create_dir_all(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o600)).unwrap();

        // Privileged users can enter anything
        if fs::metadata(locked.join(".")).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let (report, recorder, lines) =
            walk(&context, WalkOptions::default(), &root, RunMode::Execute);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let handled: Vec<_> = recorder.handled.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(handled, vec![root.join("a"), root.join("c")]);
        assert_eq!(report.inaccessible, 1);
        assert!(lines.contains(&format!(
            "[Warning: Cannot cd into {} skipping directory]",
            locked.display()
        )));
        assert!(!lines.contains(&format!("[Working on directory {}]", locked.display())));
    }
}
