//! kpipe function runtime.
//!
//! Turns a declared function into a filter over a resource collection:
//! configuration is resolved, the function is executed through an
//! [`FnExecutor`], and [`FunctionRunner`] records the outcome in the
//! package's [`kpipe_core::ResultList`].

#![forbid(unsafe_code)]

pub mod config;
pub mod container;
pub mod exec;
pub mod executor;
pub mod format;
pub mod function;
pub mod options;
mod process;
pub mod reporter;
pub mod runner;
pub mod wire;

pub use config::{resolve_fn_config, FUNCTION_INPUT_NAME};
pub use container::ContainerFn;
pub use exec::ExecFn;
pub use executor::{ExecFailure, ExecPolicy, FailureReason, FnExecutor, FnOutput, Mount};
pub use format::{format_lines, Truncation};
pub use function::Function;
pub use options::RuntimeOptions;
pub use reporter::{BufferReporter, ConsoleReporter, Reporter, StderrReporter};
pub use runner::{DefaultExecutors, ExecutorFactory, FunctionRunner};
