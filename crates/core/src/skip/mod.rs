//! Skip rules for test directories
//!
//! Marker files decide whether a directory is tested. Subtree-level markers
//! sit next to the directory and are checked first; self-only markers sit
//! inside it. The first subtree-level marker that fires wins, so a pruned
//! directory never has its self-only markers evaluated.

use crate::{
    context::RunContext,
    error::{Error, Result},
    runner::process,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Marker inside a directory whose condition skips the directory's own tests
pub const SKIPIF_FILE: &str = "SKIPIF";
/// Marker inside a directory that always skips the directory's own tests
pub const NOTEST_FILE: &str = "NOTEST";
/// Suffix of the sibling marker that prunes a directory and its children
pub const NOTEST_SUFFIX: &str = "notest";
/// Suffix of the sibling marker whose condition prunes a directory
pub const SKIPIF_SUFFIX: &str = "skipif";

/// Which marker produced a skip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotestSibling,
    SkipifSibling,
    Skipif,
    NotestMarker,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipReason::NotestSibling => "notest-sibling",
            SkipReason::SkipifSibling => "skipif-sibling",
            SkipReason::Skipif => "SKIPIF",
            SkipReason::NotestMarker => "NOTEST-marker",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirective {
    None,
    /// Skip the directory and never enumerate its children
    PruneSubtree(SkipReason),
    /// Skip the directory's own tests; children are still visited
    SkipSelfOnly(SkipReason),
}

impl SkipDirective {
    pub fn prunes_children(&self) -> bool {
        matches!(self, SkipDirective::PruneSubtree(_))
    }

    pub fn skips_self(&self) -> bool {
        !matches!(self, SkipDirective::None)
    }
}

/// Outcome of evaluating one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub directive: SkipDirective,
    /// The marker file that fired, if any
    pub marker: Option<PathBuf>,
    /// Soft failures, meant for the log
    pub warnings: Vec<String>,
    /// Output printed by condition scripts ahead of their verdict, meant for
    /// the console
    pub info: Vec<String>,
}

impl Verdict {
    fn new() -> Self {
        Self {
            directive: SkipDirective::None,
            marker: None,
            warnings: Vec::new(),
            info: Vec::new(),
        }
    }

    fn decided(mut self, directive: SkipDirective, marker: PathBuf) -> Self {
        self.directive = directive;
        self.marker = Some(marker);
        self
    }
}

/// What a condition script printed, split into its verdict and the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutput {
    pub skip: bool,
    pub info: Vec<String>,
}

impl ConditionOutput {
    /// The last line is the verdict; `1` and `True` mean skip
    pub fn parse(output: &str) -> Self {
        let mut lines: Vec<&str> = output.trim().lines().collect();
        let verdict = lines.pop().unwrap_or("").trim();
        Self {
            skip: verdict == "1" || verdict == "True",
            info: lines.into_iter().map(str::to_string).collect(),
        }
    }
}

pub struct SkipEvaluator<'a> {
    context: &'a RunContext,
    helper: PathBuf,
}

impl<'a> SkipEvaluator<'a> {
    pub fn new(context: &'a RunContext) -> Self {
        Self {
            context,
            helper: context.test_util("testEnv"),
        }
    }

    /// Decide what to do with `dir`, which must exist and be accessible
    pub fn evaluate(&self, dir: &Path) -> Verdict {
        let mut verdict = Verdict::new();

        if let Some(notest) = sibling_marker(dir, NOTEST_SUFFIX).filter(|p| p.is_file()) {
            debug!("Pruning {} because of {}", dir.display(), notest.display());
            return verdict.decided(SkipDirective::PruneSubtree(SkipReason::NotestSibling), notest);
        }

        if let Some(skipif) = sibling_marker(dir, SKIPIF_SUFFIX).filter(|p| p.is_file()) {
            match self.check_condition(dir, &skipif) {
                Ok(output) => {
                    verdict.info.extend(output.info);
                    if output.skip {
                        return verdict.decided(
                            SkipDirective::PruneSubtree(SkipReason::SkipifSibling),
                            skipif,
                        );
                    }
                }
                Err(err) => {
                    debug!("{} failed: {}", skipif.display(), err);
                    verdict.warnings.push("[Warning: .skipif error.]".to_string());
                }
            }
        }

        let skipif = dir.join(SKIPIF_FILE);
        if skipif.is_file() {
            match self.check_condition(dir, &skipif) {
                Ok(output) => {
                    verdict.info.extend(output.info);
                    if output.skip {
                        return verdict
                            .decided(SkipDirective::SkipSelfOnly(SkipReason::Skipif), skipif);
                    }
                }
                Err(err) => {
                    debug!("{} failed: {}", skipif.display(), err);
                    verdict.warnings.push("[Warning: SKIPIF error.]".to_string());
                }
            }
        }

        let notest = dir.join(NOTEST_FILE);
        if notest.is_file() {
            return verdict.decided(SkipDirective::SkipSelfOnly(SkipReason::NotestMarker), notest);
        }

        verdict
    }

    /// Run a condition script through the helper from inside `dir`
    pub fn check_condition(&self, dir: &Path, script: &Path) -> Result<ConditionOutput> {
        if !process::is_executable(&self.helper) {
            return Err(Error::ConfigError(format!(
                "cannot execute {}",
                self.helper.display()
            )));
        }

        let mut cmd = Command::new(&self.helper);
        cmd.arg(script).current_dir(dir);
        self.context.scoped().apply(&mut cmd);

        let output = process::capture(&mut cmd)?;
        Ok(ConditionOutput::parse(&output))
    }
}

/// `<parent>/<dirname>.<suffix>`
fn sibling_marker(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let name = dir.file_name()?.to_string_lossy();
    let parent = dir.parent()?;
    Some(parent.join(format!("{name}.{suffix}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A util dir whose testEnv prints the condition file, so test markers
    /// can spell out exactly what the helper should answer
    fn fixture() -> (TempDir, RunContext) {
        let temp_dir = TempDir::new().unwrap();
        let util = temp_dir.path().join("util");
        fs::create_dir_all(util.join("test")).unwrap();

        let helper = util.join("test").join("testEnv");
        fs::write(
            &helper,
            "#!/bin/sh\ncase \"$(cat \"$1\")\" in\n  explode) exit 1 ;;\nesac\ncat \"$1\"\n",
        )
        .unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        let context = RunContext::new(
            Environment::from_process(),
            &util,
            temp_dir.path(),
            temp_dir.path(),
        );
        (temp_dir, context)
    }

    fn tree(root: &Path) -> PathBuf {
        let dir = root.join("tests").join("t");
        fs::create_dir_all(dir.join("sub")).unwrap();
        dir
    }

    #[test]
    fn test_no_markers() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(verdict.directive, SkipDirective::None);
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn test_notest_sibling_prunes() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.with_file_name("t.notest"), "").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(
            verdict.directive,
            SkipDirective::PruneSubtree(SkipReason::NotestSibling)
        );
        assert_eq!(verdict.marker, Some(dir.with_file_name("t.notest")));
    }

    #[test]
    fn test_skipif_sibling_true_prunes() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.with_file_name("t.skipif"), "True\n").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(
            verdict.directive,
            SkipDirective::PruneSubtree(SkipReason::SkipifSibling)
        );
    }

    #[test]
    fn test_skipif_sibling_false_falls_through() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.with_file_name("t.skipif"), "0\n").unwrap();
        fs::write(dir.join(NOTEST_FILE), "").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(
            verdict.directive,
            SkipDirective::SkipSelfOnly(SkipReason::NotestMarker)
        );
    }

    #[test]
    fn test_helper_failure_is_a_warning() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.with_file_name("t.skipif"), "explode").unwrap();
        fs::write(dir.join(SKIPIF_FILE), "explode").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(verdict.directive, SkipDirective::None);
        assert_eq!(
            verdict.warnings,
            vec!["[Warning: .skipif error.]", "[Warning: SKIPIF error.]"]
        );
    }

    #[test]
    fn test_skipif_inside_skips_self_with_info() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.join(SKIPIF_FILE), "info\n1\n").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert_eq!(verdict.directive, SkipDirective::SkipSelfOnly(SkipReason::Skipif));
        assert!(verdict.directive.skips_self());
        assert!(!verdict.directive.prunes_children());
        assert_eq!(verdict.info, vec!["info"]);
    }

    #[test]
    fn test_subtree_checks_win_over_self_checks() {
        let (temp_dir, context) = fixture();
        let dir = tree(temp_dir.path());
        fs::write(dir.with_file_name("t.notest"), "").unwrap();
        fs::write(dir.join(SKIPIF_FILE), "1").unwrap();
        fs::write(dir.join(NOTEST_FILE), "").unwrap();

        let verdict = SkipEvaluator::new(&context).evaluate(&dir);
        assert!(verdict.directive.prunes_children());
    }

    #[test]
    fn test_condition_output_parse() {
        assert_eq!(
            ConditionOutput::parse("checking CHPL_COMM\nTrue\n"),
            ConditionOutput {
                skip: true,
                info: vec!["checking CHPL_COMM".to_string()],
            }
        );
        assert!(!ConditionOutput::parse("").skip);
        assert!(!ConditionOutput::parse("1\n0").skip);
        assert!(!ConditionOutput::parse("yes").skip);
    }
}
