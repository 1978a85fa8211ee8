//! The test phases of a session: named files first, then directory passes,
//! then the graphs that summarize the whole run

use super::setup::PerfPlan;
use crate::{
    config::{Layout, Settings},
    context::RunContext,
    error::Result,
    log::LogSink,
    perf::{GraphTool, PerfGraphs},
    runner::RunnerInvoker,
    walker::{DirectoryWalker, NodeHandler, RunMode, WalkOptions},
};
use std::path::{Path, PathBuf};
use tracing::info;

pub(super) struct Phases<'a> {
    settings: &'a Settings,
    layout: &'a Layout,
    context: &'a RunContext,
    plan: &'a PerfPlan,
}

impl<'a> Phases<'a> {
    pub(super) fn new(
        settings: &'a Settings,
        layout: &'a Layout,
        context: &'a RunContext,
        plan: &'a PerfPlan,
    ) -> Self {
        Self {
            settings,
            layout,
            context,
            plan,
        }
    }

    pub(super) fn run(
        &self,
        files: &[PathBuf],
        dirs: &[PathBuf],
        log: &mut dyn LogSink,
    ) -> Result<()> {
        let settings = self.settings;
        let tool = GraphTool::new(
            self.context,
            &settings.graph_opts(),
            settings.start_date.as_deref(),
        );
        let graphs = self.plan.graphs.as_ref().map(|plan| {
            PerfGraphs::new(
                tool.clone(),
                &plan.perf_dir,
                &plan.description,
                &plan.test_name,
                settings.graphs_disp_range,
                settings.graphs_gen_default,
            )
        });

        self.single_files(files, graphs.as_ref(), log)?;
        self.directories(dirs, graphs.as_ref(), log)?;

        if let Some(compiler) = &self.plan.compiler {
            compiler.finish(self.context, &tool, &self.layout.test_dir, log)?;
        }

        if settings.gen_graphs {
            if let Some(graphs) = &graphs {
                graphs.from_graph_list(&self.layout.test_dir, &settings.perflabel, log)?;
            }
        }

        Ok(())
    }

    /// Files named on the command line run even when they are futures or
    /// their directory says NOTEST, unless asked to respect the markers
    fn single_files(
        &self,
        files: &[PathBuf],
        graphs: Option<&PerfGraphs<'_>>,
        log: &mut dyn LogSink,
    ) -> Result<()> {
        let settings = self.settings;
        let context = self.context.with_vars([
            ("CHPL_TEST_FUTURES", "1"),
            ("CHPL_TEST_NOTESTS", flag(!settings.respect_notests)),
            ("CHPL_TEST_SINGLES", flag(!settings.respect_skipifs)),
        ]);
        let invoker = RunnerInvoker::new(&context).with_progress(settings.progress);

        for file in files {
            let dir = file.parent().unwrap_or(Path::new("/"));
            let name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            log.blank()?;
            log.write(&format!("[Cleaning file {}]", file.display()))?;
            invoker.clean(dir, Some(&name), log)?;

            if settings.clean_only {
                continue;
            }

            let mut code = 0;
            if settings.performance || !settings.gen_graphs {
                code = invoker.invoke(dir, Some(file), log)?;
            }
            if code != 0 {
                log.write(&format!(
                    "[Error running sub_test (code {code}) for {}]",
                    context.display_path(file)
                ))?;
            }

            if settings.progress {
                eprintln!("[done]");
            }

            if settings.gen_graphs {
                if let Some(graphs) = graphs {
                    graphs.for_test(file, log)?;
                }
            }
        }

        Ok(())
    }

    fn directories(
        &self,
        dirs: &[PathBuf],
        graphs: Option<&PerfGraphs<'_>>,
        log: &mut dyn LogSink,
    ) -> Result<()> {
        let settings = self.settings;
        let context = self.context.with_vars([
            ("CHPL_TEST_FUTURES", settings.futures_mode.as_env()),
            ("CHPL_TEST_NOTESTS", "0"),
            ("CHPL_TEST_SINGLES", "0"),
        ]);

        let walker = DirectoryWalker::new(
            &context,
            WalkOptions {
                recurse: settings.recurse,
                clean_only: settings.clean_only,
                perf_keys: settings.perf_keys(),
            },
        );
        let mut handler = DirectoryHandler {
            invoker: RunnerInvoker::new(&context).with_progress(settings.progress),
            graphs,
            clean_only: settings.clean_only,
        };

        let passes = settings.directory_passes();
        for dir in dirs {
            for &mode in &passes {
                let report = walker.walk(dir, mode, &mut handler, log)?;
                info!("{} pass over {}: {:?}", mode, dir.display(), report);
            }
        }

        Ok(())
    }
}

/// Cleans and runs each directory the walker selects, or graphs it
struct DirectoryHandler<'a> {
    invoker: RunnerInvoker<'a>,
    graphs: Option<&'a PerfGraphs<'a>>,
    clean_only: bool,
}

impl NodeHandler for DirectoryHandler<'_> {
    fn handle(&mut self, dir: &Path, mode: RunMode, log: &mut dyn LogSink) -> Result<()> {
        if mode == RunMode::Graph {
            return match self.graphs {
                Some(graphs) => graphs.for_directory(dir, log),
                None => Ok(()),
            };
        }

        self.invoker.clean(dir, None, log)?;
        if self.clean_only {
            return Ok(());
        }

        let code = self.invoker.invoke(dir, None, log)?;
        if code != 0 {
            log.write(&format!(
                "[Error running sub_test (code {code}) in {}]",
                dir.display()
            ))?;
        }
        Ok(())
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}
