use crate::{summary::SuccessMarker, walker::RunMode};
use crate::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{Environment, ProjectDefaults};

/// Which future tests the runner should execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FuturesMode {
    #[default]
    Skip,
    Include,
    Only,
    SkipIf,
}

impl FuturesMode {
    /// Value exported as `CHPL_TEST_FUTURES`
    pub fn as_env(self) -> &'static str {
        match self {
            FuturesMode::Skip => "0",
            FuturesMode::Include => "1",
            FuturesMode::Only => "2",
            FuturesMode::SkipIf => "3",
        }
    }
}

impl FromStr for FuturesMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(FuturesMode::Skip),
            "1" => Ok(FuturesMode::Include),
            "2" => Ok(FuturesMode::Only),
            "3" => Ok(FuturesMode::SkipIf),
            other => Err(Error::ConfigError(format!(
                "invalid futures mode '{other}', expected 0 to 3"
            ))),
        }
    }
}

/// How multiple performance trials are reduced on graphs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GraphReduction {
    #[default]
    Avg,
    Min,
    Max,
    Med,
}

impl fmt::Display for GraphReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphReduction::Avg => "avg",
            GraphReduction::Min => "min",
            GraphReduction::Max => "max",
            GraphReduction::Med => "med",
        };
        f.write_str(name)
    }
}

impl FromStr for GraphReduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(GraphReduction::Avg),
            "min" => Ok(GraphReduction::Min),
            "max" => Ok(GraphReduction::Max),
            "med" => Ok(GraphReduction::Med),
            other => Err(Error::ConfigError(format!(
                "invalid graph reduction '{other}', expected avg, min, max or med"
            ))),
        }
    }
}

/// Every option that shapes a test session
#[derive(Debug, Clone)]
pub struct Settings {
    pub compiler: Option<PathBuf>,
    pub compopts: Vec<String>,
    pub execopts: Vec<String>,
    pub launch_cmd: Option<String>,
    pub log_file: Option<PathBuf>,

    pub mem_leaks: bool,
    pub mem_leaks_log: Option<PathBuf>,
    pub valgrind: bool,
    pub valgrind_exe: bool,
    pub preexec: Vec<PathBuf>,
    pub prediff: Vec<PathBuf>,

    pub futures_mode: FuturesMode,
    pub clean_only: bool,
    pub recurse: bool,

    pub performance: bool,
    pub perflabel: String,
    pub performance_description: String,
    pub performance_configs: Option<String>,
    pub comp_performance: bool,
    pub comp_performance_description: String,
    pub num_trials: Option<u32>,

    pub gen_graphs: bool,
    pub graphs_disp_range: bool,
    pub graphs_gen_default: GraphReduction,
    pub start_date: Option<String>,
    pub gen_graph_opts: String,

    pub comp_only: bool,
    pub num_locales: u32,
    pub max_locales: u32,
    pub multilocale_only: bool,
    pub no_stdin_redirect: bool,
    pub stdin_redirect: bool,
    pub launcher_timeout: Option<String>,

    pub chpl_home_warn: bool,
    pub progress: bool,
    pub test_root: Option<PathBuf>,

    pub junit_xml: bool,
    pub junit_xml_file: Option<PathBuf>,
    pub junit_remove_prefix: Option<String>,

    pub respect_skipifs: bool,
    pub respect_notests: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compiler: None,
            compopts: Vec::new(),
            execopts: Vec::new(),
            launch_cmd: None,
            log_file: None,
            mem_leaks: false,
            mem_leaks_log: None,
            valgrind: false,
            valgrind_exe: false,
            preexec: Vec::new(),
            prediff: Vec::new(),
            futures_mode: FuturesMode::Skip,
            clean_only: false,
            recurse: true,
            performance: false,
            perflabel: "perf".to_string(),
            performance_description: String::new(),
            performance_configs: None,
            comp_performance: false,
            comp_performance_description: String::new(),
            num_trials: None,
            gen_graphs: false,
            graphs_disp_range: true,
            graphs_gen_default: GraphReduction::Avg,
            start_date: None,
            gen_graph_opts: String::new(),
            comp_only: false,
            num_locales: 0,
            max_locales: 0,
            multilocale_only: false,
            no_stdin_redirect: false,
            stdin_redirect: false,
            launcher_timeout: None,
            chpl_home_warn: true,
            progress: false,
            test_root: None,
            junit_xml: false,
            junit_xml_file: None,
            junit_remove_prefix: None,
            respect_skipifs: false,
            respect_notests: false,
        }
    }
}

impl Settings {
    /// Layer project defaults under the explicitly given options.
    ///
    /// Lists from the defaults come first so later command-line values win
    /// when the compiler sees a flag twice.
    pub fn apply_defaults(&mut self, defaults: ProjectDefaults) {
        let ProjectDefaults {
            compopts,
            execopts,
            launch_cmd,
            preexec,
            prediff,
            num_locales,
        } = defaults;

        self.compopts = compopts.into_iter().chain(self.compopts.drain(..)).collect();
        self.execopts = execopts.into_iter().chain(self.execopts.drain(..)).collect();
        self.preexec = preexec.into_iter().chain(self.preexec.drain(..)).collect();
        self.prediff = prediff.into_iter().chain(self.prediff.drain(..)).collect();

        if self.launch_cmd.is_none() {
            self.launch_cmd = launch_cmd;
        }
        if self.num_locales == 0 {
            self.num_locales = num_locales.unwrap_or(0);
        }
    }

    /// Fill options that fall back to environment variables when not given
    pub fn apply_environment(&mut self, env: &Environment) {
        if self.launch_cmd.is_none() {
            self.launch_cmd = env.get("CHPL_TEST_LAUNCHCMD").map(str::to_string);
        }
        if self.num_trials.is_none() {
            self.num_trials = env
                .get("CHPL_TEST_NUM_TRIALS")
                .and_then(|value| value.trim().parse().ok());
        }
    }

    /// Resolve the options that imply each other
    pub fn normalize(&mut self) {
        if self.performance
            || !self.performance_description.is_empty()
            || self.perflabel != "perf"
        {
            self.performance = true;
            self.gen_graphs = true;
        }

        if !self.comp_performance_description.is_empty() {
            self.comp_performance = true;
        }

        if self.junit_xml_file.is_some() {
            self.junit_xml = true;
        }
    }

    /// Compiler options exported as `COMPOPTS`
    pub fn compopts_value(&self) -> String {
        let mut value = String::from("--cc-warnings");
        for opt in &self.compopts {
            value.push(' ');
            value.push_str(opt);
        }
        if self.performance {
            value.insert_str(0, "--fast ");
        }
        value
    }

    /// Execution options exported as `EXECOPTS`, given the absolute memory
    /// leak log path when one was requested
    pub fn execopts_value(&self, mem_leaks_log: Option<&Path>) -> String {
        let mut value = self.execopts.join(" ");
        if self.mem_leaks {
            value.push_str(" --memLeaks");
        }
        if let Some(log) = mem_leaks_log {
            value.push_str(&format!(" --memLeaksLog={}", log.display()));
        }
        value
    }

    pub fn num_trials(&self) -> u32 {
        self.num_trials.unwrap_or(1)
    }

    /// Extra options for every `genGraphs` run
    pub fn graph_opts(&self) -> String {
        match &self.performance_configs {
            Some(configs) => format!("{} --configs {}", self.gen_graph_opts, configs),
            None => self.gen_graph_opts.clone(),
        }
    }

    /// Suffix of files marking a directory as performance tests
    pub fn perf_keys(&self) -> String {
        format!("{}keys", self.perflabel)
    }

    pub fn graphs_only(&self) -> bool {
        self.gen_graphs && !self.performance
    }

    pub fn success_marker(&self) -> SuccessMarker {
        SuccessMarker::for_run(self.graphs_only(), self.comp_only)
    }

    /// Passes made over every requested directory, in order
    pub fn directory_passes(&self) -> Vec<RunMode> {
        if self.performance {
            vec![RunMode::Performance, RunMode::Graph]
        } else if self.gen_graphs {
            vec![RunMode::Graph]
        } else {
            vec![RunMode::Execute]
        }
    }
}
