//! Runs one function and records its outcome in the package ledger.

use std::path::Path;
use std::time::Instant;

use kpipe_core::{
    reconcile_provenance, Class, Error, ExecError, FnId, FnResult, Op, Resource, ResultItem, ResultList, ResultParseError,
};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::resolve_fn_config;
use crate::container::ContainerFn;
use crate::exec::ExecFn;
use crate::executor::{ExecFailure, ExecPolicy, FailureReason, FnExecutor};
use crate::format::{format_lines, Truncation};
use crate::function::Function;
use crate::reporter::Reporter;
use crate::wire::parse_results;

const RUN: Op = Op("fn.run");
const NEW_RUNNER: Op = Op("fn.newRunner");

/// Chooses the executor for a declared function.
pub trait ExecutorFactory: Send + Sync {
    fn executor(&self, f: &Function) -> Result<Box<dyn FnExecutor>, Error>;
}

/// Container images through a docker-compatible CLI; local executables
/// only when `allow_exec` is set.
#[derive(Debug, Clone)]
pub struct DefaultExecutors {
    pub policy: ExecPolicy,
    pub runtime: String,
    pub allow_exec: bool,
}

impl ExecutorFactory for DefaultExecutors {
    fn executor(&self, f: &Function) -> Result<Box<dyn FnExecutor>, Error> {
        if let Some(image) = f.image_ref() {
            return Ok(Box::new(ContainerFn::new(image, self.policy.clone(), self.runtime.clone())));
        }
        match f.exec_path() {
            Some(path) if self.allow_exec => Ok(Box::new(ExecFn::new(path, self.policy.clone()))),
            Some(_) => Err(Error::builder()
                .op(NEW_RUNNER)
                .func(f.id())
                .class(Class::InvalidParam)
                .msg("exec functions are disabled; rerun with --allow-exec")
                .build()),
            None => Err(Error::builder()
                .op(NEW_RUNNER)
                .class(Class::InvalidParam)
                .msg("function must specify an image or an exec path")
                .build()),
        }
    }
}

/// Wraps one executor invocation with progress output, result parsing and
/// ledger accounting.
pub struct FunctionRunner {
    id: FnId,
    template: FnResult,
    executor: Box<dyn FnExecutor>,
    config: Option<Resource>,
    truncation: Truncation,
    quiet: bool,
}

impl FunctionRunner {
    pub fn new(
        f: &Function,
        executor: Box<dyn FnExecutor>,
        config: Option<Resource>,
        truncation: Truncation,
    ) -> Self {
        let template = FnResult {
            image: f.image_ref().unwrap_or_default().to_string(),
            exec_path: f.exec_path().unwrap_or_default().to_string(),
            ..Default::default()
        };
        Self { id: f.id(), template, executor, config, truncation, quiet: false }
    }

    /// Resolve the function's configuration against `pkg_root` and pick its
    /// executor. Fails before anything is launched.
    pub fn from_declaration(
        f: &Function,
        pkg_root: &Path,
        factory: &dyn ExecutorFactory,
        truncation: Truncation,
    ) -> Result<Self, Error> {
        let config = resolve_fn_config(f, pkg_root)?;
        let executor = factory.executor(f)?;
        Ok(Self::new(f, executor, config, truncation))
    }

    /// Suppress progress output; the ledger is still updated.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn id(&self) -> &FnId { &self.id }

    /// Run the function over `input`. Exactly one entry is appended to
    /// `results`, whatever the outcome.
    ///
    /// An execution failure is printed here and comes back as an
    /// already-reported error carrying the exit code and stderr.
    pub async fn run(
        &self,
        input: &[Resource],
        reporter: &mut dyn Reporter,
        results: &mut ResultList,
        cancel: &CancellationToken,
    ) -> Result<Vec<Resource>, Error> {
        if !self.quiet {
            reporter.running(self.id.as_str());
        }
        counter!("fn_runs_total", 1);
        let started = Instant::now();
        let outcome = self.executor.execute(input, self.config.as_ref(), cancel).await;
        histogram!("fn_exec_ms", started.elapsed().as_secs_f64() * 1000.0);

        let (output, raw_results, failure) = match outcome {
            Ok(out) => (Some(out.resources), out.results, None),
            Err(ExecFailure { reason, results }) => (None, results, Some(reason)),
        };

        let mut entry = self.template.clone();
        let parse_err = match parse_results(raw_results.as_ref()) {
            Ok(items) => {
                entry.results = items;
                None
            }
            Err(e) => Some(e),
        };

        match (failure, parse_err) {
            (None, None) => {
                entry.exit_code = 0;
                if !self.quiet {
                    reporter.pass(self.id.as_str());
                    self.print_results(reporter, &entry.results);
                }
                info!(fn_id = %self.id, results = entry.results.len(), "function passed");
                results.push(entry);
                let mut output = output.unwrap_or_default();
                reconcile_provenance(input, &mut output);
                Ok(output)
            }
            (Some(FailureReason::Exit(mut exec)), parse_err) => {
                counter!("fn_failures_total", 1);
                entry.exit_code = exec.exit_code;
                entry.stderr = exec.stderr.clone();
                exec.fn_result = Some(Box::new(entry.clone()));
                warn!(fn_id = %self.id, exit_code = exec.exit_code, "function failed");
                if !self.quiet {
                    reporter.fail(self.id.as_str());
                    self.print_results(reporter, &entry.results);
                    self.print_exec_error(reporter, &exec);
                }
                results.push(entry);
                match parse_err {
                    Some(e) => Err(self.fail_with(|b| {
                        b.result_parse(ResultParseError { source: Box::new(e), exec: Some(exec) })
                    })),
                    None => Err(Error::already_reported(Some(exec))),
                }
            }
            (Some(reason), _) => {
                counter!("fn_failures_total", 1);
                entry.exit_code = 1;
                debug!(fn_id = %self.id, error = %reason, "function did not complete");
                if !self.quiet {
                    reporter.fail(self.id.as_str());
                    self.print_results(reporter, &entry.results);
                }
                results.push(entry);
                let class = match reason {
                    FailureReason::Cancelled => Class::Unclassified,
                    _ => Class::Internal,
                };
                Err(self.fail_with(|b| b.class(class).source(reason)))
            }
            (None, Some(e)) => {
                counter!("fn_failures_total", 1);
                entry.exit_code = 1;
                warn!(fn_id = %self.id, error = %e, "function emitted unreadable results");
                if !self.quiet {
                    reporter.fail(self.id.as_str());
                }
                results.push(entry);
                Err(self.fail_with(|b| b.result_parse(ResultParseError { source: Box::new(e), exec: None })))
            }
        }
    }

    fn fail_with(&self, f: impl FnOnce(kpipe_core::ErrorBuilder) -> kpipe_core::ErrorBuilder) -> Error {
        f(Error::builder().op(RUN).func(self.id.clone())).build()
    }

    fn print_results(&self, reporter: &mut dyn Reporter, items: &[ResultItem]) {
        if items.is_empty() {
            return;
        }
        reporter.write_out("  Results:\n");
        let lines: Vec<String> = items.iter().map(ToString::to_string).collect();
        reporter.write_out(&format_lines(&lines, false, self.truncation));
    }

    fn print_exec_error(&self, reporter: &mut dyn Reporter, exec: &ExecError) {
        let stderr = exec.stderr.trim_end_matches('\n');
        if !stderr.is_empty() {
            reporter.write_err("  Stderr:\n");
            let lines: Vec<&str> = stderr.split('\n').collect();
            reporter.write_err(&format_lines(&lines, true, self.truncation));
        }
        reporter.write_err(&format!("  Exit code: {}\n\n", exec.exit_code));
    }
}
