use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use start_test_core::{FuturesMode, GraphReduction, Settings};

use crate::commands::run_command;

/// Test Chapel code.
///
/// Every long option may also be written with a single leading dash, as in
/// `start-test -futures -compopts --fast dir/`.
#[derive(Parser, Debug)]
#[command(name = "start-test")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    \
    CHPL_HOME                 Root of the toolchain (required)\n    \
    CHPL_TEST_UTIL_DIR        Alternate util directory\n    \
    CHPL_TEST_TMP_DIR         Scratch directory kept after the run\n    \
    CHPL_TEST_LAUNCHCMD       Default for --launchcmd\n    \
    CHPL_TEST_NUM_TRIALS      Default for --numtrials\n    \
    RUST_LOG=debug            Enable debug diagnostics on stderr")]
pub struct Cli {
    /// Test files or directories
    pub tests: Vec<PathBuf>,

    /// Set options for executing tests
    #[arg(long, allow_hyphen_values = true, value_name = "OPTS")]
    pub execopts: Vec<String>,

    /// Set alternate compiler
    #[arg(long)]
    pub compiler: Option<PathBuf>,

    /// Set launch command for executing tests
    #[arg(long)]
    pub launchcmd: Option<String>,

    /// Set options for the compiler
    #[arg(long, allow_hyphen_values = true, value_name = "OPTS")]
    pub compopts: Vec<String>,

    /// Set alternate log file
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// Run with --memLeaks
    #[arg(long, alias = "memLeaks")]
    pub memleaks: bool,

    /// Set --memLeaksLog to the given file
    #[arg(long, alias = "memLeaksLog")]
    pub memleakslog: Option<PathBuf>,

    /// Run everything using valgrind
    #[arg(long)]
    pub valgrind: bool,

    /// Execute tests using valgrind
    #[arg(long)]
    pub valgrindexe: bool,

    /// Set a system-wide preexec script
    #[arg(long)]
    pub syspreexec: Vec<PathBuf>,

    /// Set a system-wide prediff script
    #[arg(long)]
    pub sysprediff: Vec<PathBuf>,

    /// Run future tests
    #[arg(long)]
    pub futures: bool,

    /// Only run future tests
    #[arg(long, alias = "futures-only")]
    pub futuresonly: bool,

    /// Run future-skipif tests
    #[arg(long, alias = "futures-skipif")]
    pub futuresskipif: bool,

    /// Set the futures mode directly (0 to 3)
    #[arg(long = "futures-mode", value_name = "MODE")]
    pub futures_mode: Option<FuturesMode>,

    /// Only clean the test directories
    #[arg(long = "clean-only", alias = "cleanonly")]
    pub clean_only: bool,

    /// Do not descend into subdirectories
    #[arg(long, alias = "no-recurse")]
    pub norecurse: bool,

    /// Run performance tests
    #[arg(long)]
    pub performance: bool,

    /// Set the performance test label
    #[arg(long, default_value = "perf")]
    pub perflabel: String,

    /// Describe this performance run
    #[arg(long = "performance-description", default_value = "")]
    pub performance_description: String,

    /// Configurations to graph together
    #[arg(long = "performance-configs", value_name = "CONFIGS")]
    pub performance_configs: Option<String>,

    /// Collect compiler performance
    #[arg(long)]
    pub compperformance: bool,

    /// Describe this compiler performance run
    #[arg(long = "compperformance-description", default_value = "")]
    pub compperformance_description: String,

    /// Number of trials for each performance test
    #[arg(long, alias = "num-trials")]
    pub numtrials: Option<u32>,

    /// Generate performance graphs
    #[arg(long = "gen-graphs", alias = "generate-graphs")]
    pub gen_graphs: bool,

    /// Do not display a range on the graphs
    #[arg(long)]
    pub nodisplaygraphrange: bool,

    /// How multiple trials are reduced on graphs
    #[arg(long, alias = "graphs-gen-default", default_value = "avg", value_name = "avg|min|max|med")]
    pub graphsgendefault: GraphReduction,

    /// Start date for the graphs
    #[arg(long, value_name = "MM/DD/YY")]
    pub startdate: Option<String>,

    /// Additional graph generation options
    #[arg(long, alias = "genGraphOpts", default_value = "", allow_hyphen_values = true)]
    pub gengraphopts: String,

    /// Only compile the tests, do not run them
    #[arg(long = "comp-only")]
    pub comp_only: bool,

    /// Number of locales for multilocale tests
    #[arg(long, default_value_t = 0)]
    pub numlocales: u32,

    /// Maximum number of locales a test may use
    #[arg(long = "max-locales", default_value_t = 0)]
    pub max_locales: u32,

    /// Only run multilocale tests
    #[arg(long = "multilocale-only")]
    pub multilocale_only: bool,

    /// Do not redirect stdin from a file
    #[arg(long)]
    pub nostdinredirect: bool,

    /// Force stdin redirection
    #[arg(long)]
    pub stdinredirect: bool,

    /// Timeout passed to the launcher
    #[arg(long)]
    pub launchertimeout: Option<String>,

    /// Do not warn when CHPL_HOME differs from the toolchain in use
    #[arg(long = "no-chpl-home-warn")]
    pub no_chpl_home_warn: bool,

    /// Log pass/fail for each test
    #[arg(long)]
    pub progress: bool,

    /// Set the absolute path of the test directory
    #[arg(long = "test-root")]
    pub test_root: Option<PathBuf>,

    /// Create a jUnit XML report
    #[arg(long = "junit-xml")]
    pub junit_xml: bool,

    /// Where to write the jUnit XML report
    #[arg(long = "junit-xml-file", value_name = "FILE")]
    pub junit_xml_file: Option<PathBuf>,

    /// Prefix removed from paths in the jUnit XML report
    #[arg(long = "junit-remove-prefix", value_name = "PREFIX")]
    pub junit_remove_prefix: Option<String>,

    /// Respect SKIPIF and .skipif files even when testing individual files
    #[arg(long = "respect-skipifs")]
    pub respect_skipifs: bool,

    /// Respect .notest files even when testing individual files
    #[arg(long = "respect-notests")]
    pub respect_notests: bool,
}

impl Cli {
    /// Execute the run and return the process exit code
    pub fn execute(self) -> Result<i32> {
        run_command(self)
    }

    /// An explicit `--futures-mode` wins over the shorthand flags
    pub fn resolved_futures_mode(&self) -> FuturesMode {
        if let Some(mode) = self.futures_mode {
            mode
        } else if self.futuresskipif {
            FuturesMode::SkipIf
        } else if self.futuresonly {
            FuturesMode::Only
        } else if self.futures {
            FuturesMode::Include
        } else {
            FuturesMode::Skip
        }
    }

    /// Split the arguments into the run options and the targets
    pub fn into_settings(self) -> (Settings, Vec<PathBuf>) {
        let futures_mode = self.resolved_futures_mode();
        let settings = Settings {
            compiler: self.compiler,
            compopts: self.compopts,
            execopts: self.execopts,
            launch_cmd: self.launchcmd,
            log_file: self.logfile,
            mem_leaks: self.memleaks,
            mem_leaks_log: self.memleakslog,
            valgrind: self.valgrind,
            valgrind_exe: self.valgrindexe,
            preexec: self.syspreexec,
            prediff: self.sysprediff,
            futures_mode,
            clean_only: self.clean_only,
            recurse: !self.norecurse,
            performance: self.performance,
            perflabel: self.perflabel,
            performance_description: self.performance_description,
            performance_configs: self.performance_configs,
            comp_performance: self.compperformance,
            comp_performance_description: self.compperformance_description,
            num_trials: self.numtrials,
            gen_graphs: self.gen_graphs,
            graphs_disp_range: !self.nodisplaygraphrange,
            graphs_gen_default: self.graphsgendefault,
            start_date: self.startdate,
            gen_graph_opts: self.gengraphopts,
            comp_only: self.comp_only,
            num_locales: self.numlocales,
            max_locales: self.max_locales,
            multilocale_only: self.multilocale_only,
            no_stdin_redirect: self.nostdinredirect,
            stdin_redirect: self.stdinredirect,
            launcher_timeout: self.launchertimeout,
            chpl_home_warn: !self.no_chpl_home_warn,
            progress: self.progress,
            test_root: self.test_root,
            junit_xml: self.junit_xml,
            junit_xml_file: self.junit_xml_file,
            junit_remove_prefix: self.junit_remove_prefix,
            respect_skipifs: self.respect_skipifs,
            respect_notests: self.respect_notests,
        };
        (settings, self.tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("start-test").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_match_settings() {
        let (settings, tests) = parse(&[]).into_settings();
        let defaults = Settings::default();

        assert!(tests.is_empty());
        assert_eq!(settings.perflabel, defaults.perflabel);
        assert_eq!(settings.recurse, defaults.recurse);
        assert_eq!(settings.graphs_disp_range, defaults.graphs_disp_range);
        assert_eq!(settings.chpl_home_warn, defaults.chpl_home_warn);
        assert_eq!(settings.futures_mode, FuturesMode::Skip);
        assert!(settings.launch_cmd.is_none());
        assert!(settings.num_trials.is_none());
    }

    #[test]
    fn test_hyphenated_option_values() {
        let cli = parse(&["--compopts", "--fast", "--compopts", "-O", "--execopts", "--quiet", "dir"]);
        assert_eq!(cli.compopts, vec!["--fast", "-O"]);
        assert_eq!(cli.execopts, vec!["--quiet"]);
        assert_eq!(cli.tests, vec![PathBuf::from("dir")]);
    }

    #[test]
    fn test_futures_mode_precedence() {
        assert_eq!(parse(&["--futures"]).resolved_futures_mode(), FuturesMode::Include);
        assert_eq!(parse(&["--futures-only"]).resolved_futures_mode(), FuturesMode::Only);
        assert_eq!(
            parse(&["--futures", "--futures-mode", "3"]).resolved_futures_mode(),
            FuturesMode::SkipIf
        );
    }

    #[test]
    fn test_negative_flags() {
        let (settings, _) = parse(&["--no-recurse", "--nodisplaygraphrange", "--no-chpl-home-warn"])
            .into_settings();
        assert!(!settings.recurse);
        assert!(!settings.graphs_disp_range);
        assert!(!settings.chpl_home_warn);
    }

    #[test]
    fn test_graph_reduction_choices() {
        assert_eq!(parse(&["--graphs-gen-default", "min"]).graphsgendefault, GraphReduction::Min);
        assert!(Cli::try_parse_from(["start-test", "--graphsgendefault", "mean"]).is_err());
    }
}
