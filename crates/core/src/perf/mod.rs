//! Performance graphs and the records that go with them
//!
//! Everything here drives helpers from `<util>/test`: `genGraphs` renders
//! graphs from `.dat` files, `combineCompPerfData` merges compiler timings,
//! and `computePerfStats` appends the current commit to the perf data.
//! Failures are logged as `[Error ...]` lines and never stop the session.

use crate::{
    config::GraphReduction,
    context::RunContext,
    error::{Error, Result},
    log::LogSink,
    runner::process,
    walker::TEST_SUFFIXES,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::debug;

/// Front end to `genGraphs` with the options shared by every graph run
#[derive(Debug, Clone)]
pub struct GraphTool<'a> {
    context: &'a RunContext,
    program: PathBuf,
    extra_opts: Vec<String>,
    start_date: Option<String>,
}

impl<'a> GraphTool<'a> {
    pub fn new(context: &'a RunContext, extra_opts: &str, start_date: Option<&str>) -> Self {
        Self {
            context,
            program: context.test_util("genGraphs"),
            extra_opts: extra_opts.split_whitespace().map(str::to_string).collect(),
            start_date: start_date.map(str::to_string),
        }
    }

    /// Build a `genGraphs` command line: extra options, `args`, then the
    /// start date when one was given, then `trailing`
    pub fn command(&self, args: &[&str], trailing: &[String], cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_opts).args(args);
        if let Some(date) = &self.start_date {
            cmd.arg("-s").arg(date);
        }
        cmd.args(trailing);
        self.context.scoped().apply(&mut cmd);
        cmd.current_dir(cwd);
        cmd
    }

    /// Run a command built by [`GraphTool::command`], streaming it to `log`.
    /// A helper that cannot be started counts as a failed run.
    pub fn run(&self, cmd: Command, log: &mut dyn LogSink) -> Result<bool> {
        match process::run_and_log(cmd, log) {
            Ok(code) => Ok(code == 0),
            Err(err @ Error::CommandFailed { .. }) => {
                debug!("genGraphs did not start: {}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Graphs of execution performance
#[derive(Debug, Clone)]
pub struct PerfGraphs<'a> {
    tool: GraphTool<'a>,
    perf_dir: PathBuf,
    html_dir: PathBuf,
    test_name: String,
    display_range: bool,
    reduction: GraphReduction,
}

impl<'a> PerfGraphs<'a> {
    pub fn new(
        tool: GraphTool<'a>,
        perf_dir: &Path,
        description: &str,
        test_name: &str,
        display_range: bool,
        reduction: GraphReduction,
    ) -> Self {
        Self {
            tool,
            perf_dir: perf_dir.to_path_buf(),
            html_dir: perf_dir.join(description).join("html"),
            test_name: test_name.to_string(),
            display_range,
            reduction,
        }
    }

    fn location_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.perf_dir.display().to_string(),
            "-o".to_string(),
            self.html_dir.display().to_string(),
        ]
    }

    fn reduction_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.display_range {
            args.push("--no-bounds".to_string());
        }
        args.push("-r".to_string());
        args.push(self.reduction.to_string());
        args
    }

    /// Graph every `*.graph` file directly inside `dir`
    pub fn for_directory(&self, dir: &Path, log: &mut dyn LogSink) -> Result<()> {
        let graph_files = graph_files_in(dir);
        if graph_files.is_empty() {
            return Ok(());
        }
        self.generate(dir, graph_files, log)
    }

    /// Graph the `.graph` file belonging to a single test, if it has one
    pub fn for_test(&self, test: &Path, log: &mut dyn LogSink) -> Result<()> {
        let graph = graph_file_for(test);
        if !graph.is_file() {
            return Ok(());
        }
        let dir = test.parent().unwrap_or(Path::new("."));
        self.generate(dir, vec![graph.display().to_string()], log)
    }

    fn generate(&self, dir: &Path, graph_files: Vec<String>, log: &mut dyn LogSink) -> Result<()> {
        let target = format!(
            "graph_files in {} in {}",
            dir.display(),
            self.html_dir.display()
        );
        log.write(&format!("[Executing genGraphs for {target}]"))?;

        let location = self.location_args();
        let mut args: Vec<&str> = location.iter().map(String::as_str).collect();
        args.extend(["-n", self.test_name.as_str()]);

        let mut trailing = self.reduction_args();
        trailing.extend(graph_files);

        let cmd = self.tool.command(&args, &trailing, dir);
        if self.tool.run(cmd, log)? {
            log.write(&format!("[Success generating graphs for {target}]"))
        } else {
            log.write(&format!("[Error generating graphs for {target}]"))
        }
    }

    /// Graph everything listed in the test tree's `GRAPHFILES` (prefixed by
    /// the upper-cased label for non-default labels)
    pub fn from_graph_list(&self, test_dir: &Path, perflabel: &str, log: &mut dyn LogSink) -> Result<()> {
        let list = graph_list_path(test_dir, perflabel);
        log.write(&format!(
            "[Executing genGraphs for {} in {}]",
            list.display(),
            self.html_dir.display()
        ))?;

        let location = self.location_args();
        let test_dir_arg = test_dir.display().to_string();
        let mut args: Vec<&str> = location.iter().map(String::as_str).collect();
        args.extend(["-t", test_dir_arg.as_str(), "-n", self.test_name.as_str()]);

        let mut trailing = self.reduction_args();
        trailing.push("-g".to_string());
        trailing.push(list.display().to_string());

        let cmd = self.tool.command(&args, &trailing, test_dir);
        let outcome = if self.tool.run(cmd, log)? { "Success" } else { "Error" };
        log.write(&format!(
            "[{outcome} generating graphs from {} in {}]",
            list.display(),
            self.html_dir.display()
        ))
    }
}

/// Compiler performance collection for one session
#[derive(Debug, Clone)]
pub struct CompilerPerf {
    pub dat_dir: PathBuf,
    pub html_dir: PathBuf,
    pub test_name: String,
    pub temp_dat_dir: PathBuf,
    started: Instant,
}

impl CompilerPerf {
    pub const GRAPH_TITLE: &'static str = "Chapel Compiler Performance Graphs";

    /// Start collecting. Timings land in `<tmp>/tempCompPerfDatFiles`, which
    /// is emptied if an earlier session left it behind.
    pub fn start(tmp_dir: &Path, dat_dir: &Path, test_name: &str) -> Result<Self> {
        let temp_dat_dir = tmp_dir.join("tempCompPerfDatFiles");
        if temp_dat_dir.is_dir() {
            fs::remove_dir_all(&temp_dat_dir)?;
        }

        Ok(Self {
            dat_dir: dat_dir.to_path_buf(),
            html_dir: dat_dir.join("html"),
            test_name: test_name.to_string(),
            temp_dat_dir,
            started: Instant::now(),
        })
    }

    /// Value of `CHPL_TEST_COMP_PERF_TEMP_DAT_DIR`, with a trailing separator
    pub fn temp_dat_dir_env(&self) -> String {
        format!("{}{}", self.temp_dat_dir.display(), std::path::MAIN_SEPARATOR)
    }

    /// Merge the collected timings and graph them
    pub fn finish(
        &self,
        context: &RunContext,
        tool: &GraphTool<'_>,
        test_dir: &Path,
        log: &mut dyn LogSink,
    ) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs().to_string();

        log.write("[Combining dat files now]")?;
        let mut combine = Command::new(context.test_util("combineCompPerfData"));
        combine
            .arg("--tempDatDir")
            .arg(self.temp_dat_dir_env())
            .arg("--elapsedTestTime")
            .arg(&elapsed)
            .arg("--outDir")
            .arg(&self.dat_dir);
        context.scoped().apply(&mut combine);
        match process::capture(&mut combine) {
            Ok(output) => {
                log.write(&output)?;
                log.write("[Success combining compiler performance dat files]")?;
            }
            Err(err) => {
                debug!("combineCompPerfData failed: {}", err);
                log.write("[Error combining compiler performance dat files]")?;
            }
        }

        let list = test_dir.join("COMPGRAPHFILES");
        log.write("[Creating compiler performance graphs now]")?;

        let dat_dir = self.dat_dir.display().to_string();
        let html_dir = self.html_dir.display().to_string();
        let args = [
            "-p",
            dat_dir.as_str(),
            "-o",
            html_dir.as_str(),
            "-a",
            Self::GRAPH_TITLE,
            "-n",
            self.test_name.as_str(),
        ];
        let trailing = vec![
            "-g".to_string(),
            list.display().to_string(),
            "-t".to_string(),
            test_dir.display().to_string(),
            "-m".to_string(),
            "all:v,examples:v".to_string(),
            "-x".to_string(),
        ];

        let cmd = tool.command(&args, &trailing, test_dir);
        let outcome = if tool.run(cmd, log)? { "Success" } else { "Error" };
        log.write(&format!(
            "[{outcome} generating compiler performance graphs from {} in {}]",
            list.display(),
            self.html_dir.display()
        ))?;

        if self.temp_dat_dir.is_dir() {
            fs::remove_dir_all(&self.temp_dat_dir)?;
        }
        Ok(())
    }
}

/// Append the current commit to `<dat_dir>/perfSha.dat` so graphs can map
/// dates to commits. Failure is logged, never fatal.
pub fn record_sha(
    context: &RunContext,
    dat_dir: &Path,
    sha: Option<&str>,
    log: &mut dyn LogSink,
) -> Result<()> {
    const SHA_DAT_NAME: &str = "perfSha";

    fs::create_dir_all(dat_dir)?;

    let keys = context.tmp_dir().join("sha.perf_keys");
    fs::write(&keys, "sha ")?;
    let out = context.tmp_dir().join("sha.exec.out.tmp");
    fs::write(&out, sha.map(|sha| format!("sha {sha}")).unwrap_or_default())?;

    let dat_file = dat_dir.join(format!("{SHA_DAT_NAME}.dat"));
    log.write(&format!("[Saving current git sha to {}]", dat_file.display()))?;

    let mut cmd = Command::new(context.test_util("computePerfStats"));
    cmd.arg(SHA_DAT_NAME).arg(dat_dir).arg(&keys).arg(&out);
    context.scoped().apply(&mut cmd);

    match process::capture(&mut cmd) {
        Ok(output) => log.write(&output),
        Err(err) => {
            debug!("computePerfStats failed: {}", err);
            log.write(&format!(
                "[Error: Failed to save current sha to {}]",
                dat_file.display()
            ))
        }
    }
}

/// `<test_dir>/GRAPHFILES`, or `<LABEL>GRAPHFILES` for a custom label
pub fn graph_list_path(test_dir: &Path, perflabel: &str) -> PathBuf {
    let prefix = if perflabel == "perf" {
        String::new()
    } else {
        perflabel.to_uppercase()
    };
    test_dir.join(format!("{prefix}GRAPHFILES"))
}

/// The `.graph` file that goes with a test source
pub fn graph_file_for(test: &Path) -> PathBuf {
    let name = test.to_string_lossy();
    let stem = TEST_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(&name);
    PathBuf::from(format!("{stem}.graph"))
}

fn graph_files_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".graph"))
        .collect();
    files.sort();
    files
}
