//! Pipeline orchestration for a single package.

use std::path::Path;
use std::time::Instant;

use kpipe_builtins::generate_pkg_context;
use kpipe_core::{Error, Op, Resource, ResultList};
use kpipe_fnruntime::{ExecutorFactory, Function, FunctionRunner, Reporter, Truncation};
use metrics::histogram;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::kptfile::Pipeline;

const RENDER: Op = Op("fn.render");

/// Ledger plus either the final resources or the error that halted the
/// pipeline. The ledger holds every entry up to and including the failure.
#[derive(Debug)]
pub struct RenderOutput {
    pub results: ResultList,
    pub resources: Result<Vec<Resource>, Error>,
}

impl RenderOutput {
    fn failed(results: ResultList, err: Error) -> Self {
        Self { results, resources: Err(err) }
    }
}

/// Runs declared pipelines through an [`ExecutorFactory`].
pub struct Renderer<'a> {
    factory: &'a dyn ExecutorFactory,
    truncation: Truncation,
}

impl<'a> Renderer<'a> {
    pub fn new(factory: &'a dyn ExecutorFactory, truncation: Truncation) -> Self {
        Self { factory, truncation }
    }

    pub(crate) fn factory(&self) -> &'a dyn ExecutorFactory { self.factory }
    pub(crate) fn truncation(&self) -> Truncation { self.truncation }

    /// Render one package: regenerate its package context, run mutators in
    /// order threading output to input, then run validators over the
    /// result. Halts at the first failing function.
    pub async fn render(
        &self,
        pkg_root: &Path,
        initial: Vec<Resource>,
        pipeline: &Pipeline,
        reporter: &mut dyn Reporter,
        cancel: &CancellationToken,
    ) -> RenderOutput {
        let span = info_span!("render", pkg = %pkg_root.display());
        let started = Instant::now();
        let out = self.render_inner(pkg_root, initial, pipeline, reporter, cancel).instrument(span).await;
        histogram!("pipeline_render_ms", started.elapsed().as_secs_f64() * 1000.0);
        out
    }

    async fn render_inner(
        &self,
        pkg_root: &Path,
        initial: Vec<Resource>,
        pipeline: &Pipeline,
        reporter: &mut dyn Reporter,
        cancel: &CancellationToken,
    ) -> RenderOutput {
        let mut results = ResultList::new();
        let wrap = |e: Error| Error::builder().op(RENDER).path(pkg_root).wrap(e).build();

        let runners = match self.prepare(pkg_root, pipeline) {
            Ok(r) => r,
            Err(e) => return RenderOutput::failed(results, wrap(e)),
        };
        let (mutators, validators) = runners;

        let mut resources = match generate_pkg_context(initial) {
            Ok(out) => {
                for item in &out.results {
                    info!(result = %item, "package context");
                }
                out.resources
            }
            Err(e) => return RenderOutput::failed(results, wrap(e)),
        };

        for runner in &mutators {
            match runner.run(&resources, reporter, &mut results, cancel).await {
                Ok(next) => resources = next,
                Err(e) => return RenderOutput::failed(results, wrap(e)),
            }
        }
        for runner in &validators {
            if let Err(e) = runner.run(&resources, reporter, &mut results, cancel).await {
                return RenderOutput::failed(results, wrap(e));
            }
        }
        info!(functions = results.len(), resources = resources.len(), "pipeline completed");
        RenderOutput { results, resources: Ok(resources) }
    }

    /// Validate every declaration and build its runner before anything runs.
    fn prepare(
        &self,
        pkg_root: &Path,
        pipeline: &Pipeline,
    ) -> Result<(Vec<FunctionRunner>, Vec<FunctionRunner>), Error> {
        for f in pipeline.functions() {
            f.validate()?;
        }
        let build = |fs: &[Function]| -> Result<Vec<FunctionRunner>, Error> {
            fs.iter()
                .map(|f| FunctionRunner::from_declaration(f, pkg_root, self.factory, self.truncation))
                .collect()
        };
        Ok((build(&pipeline.mutators)?, build(&pipeline.validators)?))
    }
}
