//! Everything between argument handling and the first test
//!
//! Setup turns the settings into the variables every runner sees and logs
//! the header of the run. Problems that make the run meaningless, such as a
//! missing compiler, are `Error::Fatal`.

use super::LogFiles;
use crate::{
    config::{Environment, Layout, Settings},
    context::{RunContext, ToolchainEnv},
    error::{Error, Result},
    log::LogSink,
    perf::{self, CompilerPerf},
    runner::process,
};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Timestamp format of the start, done and summary lines
pub const RUN_DATE_FORMAT: &str = "%y%m%d.%H%M%S";

const THREADS_VAR: &str = "CHPL_RT_NUM_THREADS_PER_LOCALE";

/// Launchers known to pass stdin through to the program
const STDIN_LAUNCHERS: &[&str] = &["none", "amudprun", "slurm-srun"];

/// Clear variables that change the toolchain's behavior in ways tests don't
/// expect, and pin the locale so sorting in helper scripts is stable
pub fn prepare_environment(env: &mut Environment) {
    env.remove("CHPL_DEVELOPER");
    env.remove("CHPL_EXE_NAME");
    if env.contains("CHPL_UNWIND") {
        env.set("CHPL_RT_UNWIND", "0");
    }
    env.set("LC_COLLATE", "C");
    env.set("LANG", "en_US.UTF-8");
    env.remove("LC_ALL");
}

/// Graph output locations chosen during setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPlan {
    pub perf_dir: PathBuf,
    pub description: String,
    pub test_name: String,
}

/// Performance work the phases should do
#[derive(Debug, Clone, Default)]
pub struct PerfPlan {
    pub graphs: Option<GraphPlan>,
    pub compiler: Option<CompilerPerf>,
}

pub(super) struct Setup<'s> {
    settings: &'s Settings,
    layout: &'s Layout,
    toolchain: &'s ToolchainEnv,
    files: &'s LogFiles,
    cwd: &'s Path,
    context: RunContext,
    execopts: String,
}

impl<'s> Setup<'s> {
    pub(super) fn new(
        settings: &'s Settings,
        layout: &'s Layout,
        toolchain: &'s ToolchainEnv,
        files: &'s LogFiles,
        cwd: &'s Path,
        context: RunContext,
    ) -> Self {
        Self {
            settings,
            layout,
            toolchain,
            files,
            cwd,
            context,
            execopts: String::new(),
        }
    }

    pub(super) fn run(mut self, log: &mut dyn LogSink) -> Result<(RunContext, PerfPlan)> {
        self.option_environment(log)?;
        self.general(log)?;
        self.performance_flags(log)?;
        self.executables(log)?;
        let plan = self.performance_dirs(log)?;
        Ok((self.context, plan))
    }

    fn option_environment(&mut self, log: &mut dyn LogSink) -> Result<()> {
        let settings = self.settings;

        if settings.mem_leaks || settings.mem_leaks_log.is_some() {
            self.context.set("CHPL_MEM_LEAK_TESTING", "true");
        }
        let leaks_log = settings.mem_leaks_log.as_ref().map(|path| self.cwd.join(path));
        if let Some(path) = leaks_log.as_ref().filter(|path| path.is_file()) {
            log.write(&format!(
                "[Removing memory leaks log file with duplicate name {}]",
                path.display()
            ))?;
            fs::remove_file(path)?;
        }
        self.execopts = settings.execopts_value(leaks_log.as_deref());

        if settings.comp_only {
            self.context.set("CHPL_COMPONLY", "true");
        }

        if settings.no_stdin_redirect || settings.stdin_redirect {
            self.context.set("CHPL_NO_STDIN_REDIRECT", "true");
            if settings.stdin_redirect {
                self.context.set("CHPL_TEST_FORCE_STDIN_REDIRECT", "true");
            }
        }

        if let Some(timeout) = &settings.launcher_timeout {
            self.context.set("CHPL_LAUNCHER_TIMEOUT", timeout.as_str());
        }

        self.context
            .set("CHPL_TEST_NUM_TRIALS", settings.num_trials().to_string());

        if let Some(root) = &settings.test_root {
            self.context.set("CHPL_TEST_ROOT_DIR", root.to_string_lossy());
        }

        Ok(())
    }

    fn general(&mut self, log: &mut dyn LogSink) -> Result<()> {
        log.write(&format!(
            "[Starting Chapel regression tests - {}]",
            Local::now().format(RUN_DATE_FORMAT)
        ))?;

        let branch = git(&self.context, self.cwd, &["rev-parse", "--abbrev-ref", "HEAD"]);
        let sha = git(&self.context, self.cwd, &["rev-parse", "--short", "HEAD"]);
        log.write(&format!(
            "[git branch: '{}' ({})]",
            branch.as_deref().unwrap_or("unknown"),
            sha.as_deref().unwrap_or("unknown")
        ))?;

        if self.settings.chpl_home_warn && !within(self.cwd, &self.layout.home) {
            log.console("[Warning: start_test not invoked from a subdirectory of $CHPL_HOME]");
        }

        log.write(&format!("[starting directory: \"{}\"]", self.cwd.display()))?;
        log.write(&format!(
            "[Logs directory: \"{}\"]",
            self.layout.logs_dir.display()
        ))?;
        log.write(&format!("[log_file: \"{}\"]", self.files.log_file.display()))?;
        log.write(&format!("[CHPL_HOME: {}]", self.layout.home.display()))?;
        log.write(&format!("[host platform: {}]", self.toolchain.host_platform()))?;
        log.write(&format!(
            "[target platform: {}]",
            self.toolchain.target_platform()
        ))?;

        self.valgrind(log)
    }

    fn valgrind(&mut self, log: &mut dyn LogSink) -> Result<()> {
        let settings = self.settings;

        if settings.valgrind {
            log.write("[valgrind: ON]")?;
            let binary = self
                .first_line_of(&["which", "valgrind"])
                .ok_or_else(|| Error::Fatal("Could not find valgrind.".to_string()))?;
            let version = self
                .first_line_of(&["valgrind", "--version"])
                .unwrap_or_default();
            log.write(&format!("[valgrind binary: {binary}]"))?;
            log.write(&format!("[valgrind version: {version}]"))?;
            self.context.set("CHPL_TEST_VGRND_COMP", "on");
            self.context.set("CHPL_TEST_VGRND_EXE", "on");
        } else {
            self.context.set("CHPL_TEST_VGRND_COMP", "off");
            if settings.valgrind_exe {
                log.write("[valgrind: EXE only]")?;
                self.context.set("CHPL_TEST_VGRND_EXE", "on");
            } else {
                log.write("[valgrind: OFF]")?;
                self.context.set("CHPL_TEST_VGRND_EXE", "off");
            }
        }

        if !(settings.valgrind || settings.valgrind_exe) {
            return Ok(());
        }

        // valgrind refuses more than 500 threads by default
        if self.context.get(THREADS_VAR).is_none() {
            self.context.set(THREADS_VAR, "450");
        } else {
            log.write(&format!(
                "[Warning: Deadlock is possible since you set {THREADS_VAR}]"
            ))?;
        }
        self.context
            .set("CHPL_RT_NUM_THREADS_PER_LOCALE_QUIET", "yes");

        if self.toolchain.tasks() != "fifo" {
            return Err(Error::Fatal(
                "valgrind requires tasks=fifo - try quickstart".to_string(),
            ));
        }
        if self.toolchain.target_mem() != "cstdlib" {
            return Err(Error::Fatal(
                "valgrind requires mem=cstdlib - try quickstart".to_string(),
            ));
        }
        let re2_valgrind = self
            .toolchain
            .get("CHPL_RE2_VALGRIND_SUPPORT")
            .is_some_and(|value| matches!(value, "1" | "true" | "True" | "yes"));
        if self.toolchain.re2() != "none" && !re2_valgrind {
            return Err(Error::Fatal(
                "valgrind requires re2=none or re2 built with CHPL_RE2_VALGRIND_SUPPORT"
                    .to_string(),
            ));
        }

        Ok(())
    }

    fn performance_flags(&mut self, log: &mut dyn LogSink) -> Result<()> {
        let settings = self.settings;

        if settings.performance {
            log.write("[performance tests: ON]")?;
            self.context.set("CHPL_TEST_PERF", "on");
            if settings.perflabel != "perf" {
                log.write(&format!("[performance label: {}]", settings.perflabel))?;
            }
            self.context
                .set("CHPL_TEST_PERF_LABEL", settings.perflabel.as_str());
        } else {
            log.write("[performance tests: OFF]")?;
        }

        if settings.comp_performance {
            log.write("[compiler performance tests: ON]")?;
            self.context.set("CHPL_TEST_COMP_PERF", "on");
        } else {
            log.write("[compiler performance tests: OFF]")?;
        }

        log.write(&format!("[number of trials: {}]", settings.num_trials()))?;

        if settings.gen_graphs {
            log.write("[performance graph generation: ON]")?;
            if settings.graphs_disp_range {
                log.write("[performance graph ranges: ON]")?;
            } else {
                log.write("[performance graph ranges: OFF]")?;
            }
            log.write(&format!(
                "[performance graph data reduction: {}]",
                settings.graphs_gen_default
            ))?;
        } else {
            log.write("[performance graph generation: OFF]")?;
        }

        Ok(())
    }

    fn executables(&mut self, log: &mut dyn LogSink) -> Result<()> {
        let settings = self.settings;

        let compiler = match &settings.compiler {
            Some(compiler) => self.cwd.join(compiler),
            None => self
                .layout
                .home
                .join("bin")
                .join(self.toolchain.host_bin_subdir())
                .join("chpl"),
        };
        if !process::is_executable(&compiler) {
            return Err(Error::Fatal(format!(
                "Cannot find or execute compiler: {}",
                compiler.display()
            )));
        }
        log.write(&format!("[compiler: \"{}\"]", compiler.display()))?;
        self.context.set_compiler(&compiler);

        let compopts = settings.compopts_value();
        log.write(&format!("[compopts: \"{compopts}\"]"))?;
        self.context.set("COMPOPTS", compopts);

        log.write(&format!("[execopts: \"{}\"]", self.execopts))?;
        self.context.set("EXECOPTS", self.execopts.clone());

        let launch_cmd = settings.launch_cmd.clone().unwrap_or_default();
        log.write(&format!("[launchcmd: \"{launch_cmd}\"]"))?;
        let expanded = self.context.env().expand(&launch_cmd);
        self.context.set("LAUNCHCMD", expanded);

        let toolchain = self.toolchain;
        let comm = toolchain.comm();
        let launcher = toolchain.launcher();

        log.write(&format!("[comm: \"{comm}\"]"))?;
        self.context.set("CHPL_COMM", comm);
        self.context
            .set("CHPL_GASNET_SEGMENT", toolchain.comm_segment());
        self.context.set("CHPL_LAUNCHER", launcher);

        log.write(&format!(
            "[networkAtomics: \"{}\"]",
            toolchain.network_atomics()
        ))?;
        self.context
            .set("CHPL_NETWORK_ATOMICS", toolchain.network_atomics());

        log.write(&format!("[localeModel: \"{}\"]", toolchain.locale_model()))?;
        self.context
            .set("CHPL_LOCALE_MODEL", toolchain.locale_model());

        self.context.set("CHPL_LLVM", toolchain.llvm());
        self.context.set("CHPL_TASKS", toolchain.tasks());

        if !STDIN_LAUNCHERS.contains(&launcher)
            && self.context.env().get_non_empty("CHPL_NO_STDIN_REDIRECT").is_none()
            && self
                .context
                .env()
                .get_non_empty("CHPL_TEST_FORCE_STDIN_REDIRECT")
                .is_none()
        {
            log.console(
                "[Info: assuming stdin redirection is not supported, skipping tests with stdin]",
            );
            self.context.set("CHPL_NO_STDIN_REDIRECT", "true");
        }

        if self.context.env().get_non_empty("CHPL_LAUNCHER_TIMEOUT").is_none()
            && self
                .context
                .env()
                .get_non_empty("CHPL_TEST_DONT_SET_LAUNCHER_TIMEOUT")
                .is_none()
        {
            if launcher.contains("slurm") {
                self.context.set("CHPL_LAUNCHER_TIMEOUT", "slurm");
            }
            if launcher.contains("pbs") || launcher.contains("qsub") {
                self.context.set("CHPL_LAUNCHER_TIMEOUT", "pbs");
            }
        }

        let num_locales = match settings.num_locales {
            0 if comm != "none" => 1,
            n => n,
        };
        if num_locales == 0 {
            log.write("[numlocales: \"(default)\"]")?;
        } else {
            log.write(&format!("[numlocales: \"{num_locales}\"]"))?;
        }
        self.context.set("NUMLOCALES", num_locales.to_string());

        if settings.max_locales == 0 {
            log.write("[max_locales: \"(default)\"]")?;
        } else {
            log.write(&format!("[max_locales: \"{}\"]", settings.max_locales))?;
            self.context
                .set("CHPL_TEST_MAX_LOCALES", settings.max_locales.to_string());
        }

        if settings.multilocale_only {
            if comm != "none" {
                self.context.set("CHPL_TEST_MULTILOCALE_ONLY", "true");
            } else {
                log.write("[Warning: Ignoring --multilocale-only for CHPL_COMM=none]")?;
            }
        }

        if !settings.preexec.is_empty() {
            let scripts = self.system_scripts(&settings.preexec, "preexec", log)?;
            self.context.set("CHPL_SYSTEM_PREEXEC", join_paths(&scripts));
        }

        let mut prediffs = self.system_scripts(&settings.prediff, "prediff", log)?;
        let automatic = [
            (launcher.contains("slurm"), "prediff-for-slurm"),
            (launcher.contains("lsf-"), "prediff-for-lsf"),
            (toolchain.comm_substrate().contains("ucx"), "prediff-for-ucx"),
            (toolchain.host_platform() == "darwin", "prediff-for-debug"),
        ];
        for (_, name) in automatic.iter().filter(|(applies, _)| *applies) {
            let script = self.layout.test_util(name);
            if !prediffs.contains(&script) {
                prediffs.push(script);
            }
        }
        if !prediffs.is_empty() {
            self.context.set("CHPL_SYSTEM_PREDIFF", join_paths(&prediffs));
        }

        Ok(())
    }

    /// Resolve user-supplied system-wide scripts; each must be executable
    fn system_scripts(
        &self,
        scripts: &[PathBuf],
        kind: &str,
        log: &mut dyn LogSink,
    ) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::with_capacity(scripts.len());
        for script in scripts {
            let path = self.cwd.join(script);
            if !process::is_executable(&path) {
                return Err(Error::Fatal(format!(
                    "Cannot find or execute system-wide {kind}: {}",
                    script.display()
                )));
            }
            log.write(&format!("[system-wide {kind}: {}]", path.display()))?;
            resolved.push(path);
        }
        Ok(resolved)
    }

    fn performance_dirs(&mut self, log: &mut dyn LogSink) -> Result<PerfPlan> {
        let settings = self.settings;
        let mut plan = PerfPlan::default();

        if settings.performance || settings.gen_graphs {
            let test_name = self.perf_test_name();
            let perf_dir = match self.context.env().get_non_empty("CHPL_TEST_PERF_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => {
                    let dir = self.layout.home.join("test").join("perfdat").join(&test_name);
                    self.context.set("CHPL_TEST_PERF_DIR", dir.to_string_lossy());
                    log.write(&format!(
                        "[Warning: CHPL_TEST_PERF_DIR must be set for generating performance graphs, using default {}]",
                        dir.display()
                    ))?;
                    dir
                }
            };

            let description = settings.performance_description.clone();
            if !description.is_empty() && description != "default" {
                self.context
                    .set("CHPL_TEST_PERF_DESCRIPTION", description.as_str());
            }

            plan.graphs = Some(GraphPlan {
                perf_dir,
                description,
                test_name,
            });
        }

        if settings.comp_performance {
            let name = self.perf_test_name();
            let dat_dir = match self.context.get("CHPL_TEST_COMP_PERF_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => {
                    let dir = self.layout.home.join("test").join("compperfdat").join(&name);
                    log.write(&format!(
                        "[Warning: CHPL_COMP_TEST_PERF DIR must be set for generating compiler performance graphs, using default {}]",
                        dir.display()
                    ))?;
                    dir
                }
            };

            let test_name = format!("{name}{}", settings.comp_performance_description);
            let compiler = CompilerPerf::start(self.context.tmp_dir(), &dat_dir, &test_name)?;
            self.context
                .set("CHPL_TEST_COMP_PERF_TEMP_DAT_DIR", compiler.temp_dat_dir_env());
            plan.compiler = Some(compiler);
        }

        if settings.performance || settings.comp_performance {
            let dat_dir = if settings.performance {
                plan.graphs
                    .as_ref()
                    .map(|graphs| graphs.perf_dir.join(&graphs.description))
            } else {
                plan.compiler.as_ref().map(|compiler| compiler.dat_dir.clone())
            };
            if let Some(dat_dir) = dat_dir {
                let sha = git(&self.context, self.cwd, &["rev-parse", "HEAD"]);
                perf::record_sha(&self.context, &dat_dir, sha.as_deref(), log)?;
            }
        }

        Ok(plan)
    }

    /// `CHPL_TEST_PERF_CONFIG_NAME`, else the short lowercase host name
    fn perf_test_name(&self) -> String {
        if let Some(name) = self.context.get("CHPL_TEST_PERF_CONFIG_NAME") {
            return name.to_string();
        }

        let host = self
            .context
            .env()
            .get_non_empty("HOSTNAME")
            .map(str::to_string)
            .or_else(|| self.first_line_of(&["uname", "-n"]))
            .unwrap_or_else(|| "localhost".to_string());
        host.split('.').next().unwrap_or_default().to_lowercase()
    }

    fn first_line_of(&self, argv: &[&str]) -> Option<String> {
        let (program, args) = argv.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.context.scoped().apply(&mut cmd);
        process::capture_quiet(&mut cmd)
            .ok()
            .and_then(|out| out.lines().next().map(str::to_string))
    }
}

/// Generate tests from the language specification when running the whole
/// default test tree
pub(super) fn generate_spec_tests(
    settings: &Settings,
    layout: &Layout,
    cwd: &Path,
    context: &RunContext,
    log: &mut dyn LogSink,
) -> Result<()> {
    if !layout.spec_tests || settings.clean_only || settings.gen_graphs {
        return Ok(());
    }
    if cwd != layout.home && cwd != layout.test_dir {
        return Ok(());
    }

    log.write(&format!(
        "[Generating tests from the Chapel Spec in {}/spec]",
        layout.home.display()
    ))?;

    let mut cmd = Command::new("make");
    cmd.arg("spectests");
    context.scoped().apply(&mut cmd);
    cmd.current_dir(&layout.home);

    let code = match process::run_and_log(cmd, log) {
        Ok(code) => code,
        Err(Error::CommandFailed { code, .. }) => code,
        Err(err) => return Err(err),
    };
    if code != 0 {
        return Err(Error::Fatal(format!(
            "Failed to generate Spec tests. Run 'make spectests' in {} for more info",
            layout.home.display()
        )));
    }
    info!("Generated spec tests in {}", layout.home.display());
    Ok(())
}

/// Log the toolchain's full description of itself
pub(super) fn log_toolchain_environment(context: &RunContext, log: &mut dyn LogSink) -> Result<()> {
    log.blank()?;
    log.write("### Chapel Environment ###")?;

    let mut cmd = Command::new(context.util_dir().join("printchplenv"));
    cmd.args(["--all", "--no-tidy"]);
    context.scoped().apply(&mut cmd);
    match process::capture(&mut cmd) {
        Ok(output) => log.write(&output)?,
        Err(err) => debug!("printchplenv failed: {}", err),
    }

    log.write("##########################")
}

fn git(context: &RunContext, cwd: &Path, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    context.scoped().apply(&mut cmd);
    cmd.current_dir(cwd);
    process::capture_quiet(&mut cmd)
        .ok()
        .map(|out| out.trim().to_string())
}

fn within(path: &Path, root: &Path) -> bool {
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => path.starts_with(root),
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
