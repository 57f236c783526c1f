//! Structured errors.
//!
//! An [`Error`] is one frame of a cause chain. Each frame may name the
//! operation being performed, the package, the function and an error class.
//! When a frame wraps another structured frame, fields equal on both are
//! cleared on the wrapped one so rendering never repeats them.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;

use crate::results::FnResult;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operation being performed, e.g. `fn.render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Op(pub &'static str);

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.0) }
}

/// Function identity: image reference or exec path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnId(pub String);

impl FnId {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for FnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Package directory involved in an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgPath(pub PathBuf);

impl PkgPath {
    pub fn new(p: impl AsRef<Path>) -> Self { Self(p.as_ref().to_path_buf()) }
    pub fn as_path(&self) -> &Path { &self.0 }

    /// Path relative to the working directory when it lives beneath it.
    pub fn relative(&self) -> String {
        let rel = std::env::current_dir()
            .ok()
            .and_then(|cwd| self.0.strip_prefix(&cwd).ok().map(Path::to_path_buf))
            .unwrap_or_else(|| self.0.clone());
        let s = rel.display().to_string();
        if s.is_empty() { ".".to_string() } else { s }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Class {
    /// Not printed.
    #[default]
    Unclassified,
    AlreadyExists,
    Internal,
    InvalidParam,
    MissingParam,
    Git,
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Class::Unclassified => "other error",
            Class::AlreadyExists => "item already exist",
            Class::Internal => "internal error",
            Class::InvalidParam => "invalid parameter value",
            Class::MissingParam => "missing parameter value",
            Class::Git => "git error",
        })
    }
}

/// A function process terminated abnormally or returned non-zero.
#[derive(Debug, Clone, ThisError)]
#[error("function exited with code {exit_code}")]
pub struct ExecError {
    pub exit_code: i32,
    pub stderr: String,
    /// Ledger entry of the failed invocation, attached by the runner.
    pub fn_result: Option<Box<FnResult>>,
}

impl ExecError {
    pub fn new(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code, stderr: stderr.into(), fn_result: None }
    }
}

/// The result document emitted by a function could not be decoded. When the
/// same invocation also failed to execute, that failure rides along.
#[derive(Debug)]
pub struct ResultParseError {
    pub source: BoxError,
    pub exec: Option<ExecError>,
}

impl fmt::Display for ResultParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse function results: {}", self.source)?;
        if let Some(exec) = &self.exec {
            write!(f, " (execution also failed: {})", exec)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResultParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[derive(Debug)]
pub enum Cause {
    Structured(Box<Error>),
    Exec(ExecError),
    ResultParse(ResultParseError),
    /// Failure already printed to the user; outer layers stay silent. Carries
    /// the execution failure that was printed, when there was one.
    AlreadyReported(Option<ExecError>),
    Other(BoxError),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Structured(e) => e.fmt(f),
            Cause::Exec(e) => e.fmt(f),
            Cause::ResultParse(e) => e.fmt(f),
            Cause::AlreadyReported(_) => f.write_str("already reported"),
            Cause::Other(e) => e.fmt(f),
        }
    }
}

#[derive(Debug, Default)]
pub struct Error {
    op: Option<Op>,
    path: Option<PkgPath>,
    func: Option<FnId>,
    class: Class,
    cause: Option<Cause>,
}

impl Error {
    pub fn builder() -> ErrorBuilder { ErrorBuilder::default() }

    /// Sentinel for a failure that has already been shown to the user.
    pub fn already_reported(exec: Option<ExecError>) -> Self {
        Self { cause: Some(Cause::AlreadyReported(exec)), ..Default::default() }
    }

    pub fn op(&self) -> Option<Op> { self.op }
    pub fn path(&self) -> Option<&PkgPath> { self.path.as_ref() }
    pub fn func(&self) -> Option<&FnId> { self.func.as_ref() }
    pub fn class(&self) -> Class { self.class }
    pub fn cause(&self) -> Option<&Cause> { self.cause.as_ref() }

    /// No fragment and no cause. Renders as "no error"; still an error value.
    pub fn is_zero(&self) -> bool {
        self.op.is_none() && self.path.is_none() && self.func.is_none() && self.class == Class::Unclassified && self.cause.is_none()
    }

    pub fn is_already_reported(&self) -> bool {
        match &self.cause {
            Some(Cause::AlreadyReported(_)) => true,
            Some(Cause::Structured(inner)) => inner.is_already_reported(),
            _ => false,
        }
    }

    /// First execution failure in the chain, including one carried by a
    /// result-parse failure.
    pub fn exec_error(&self) -> Option<&ExecError> {
        match &self.cause {
            Some(Cause::Exec(e)) => Some(e),
            Some(Cause::ResultParse(e)) => e.exec.as_ref(),
            Some(Cause::AlreadyReported(e)) => e.as_ref(),
            Some(Cause::Structured(inner)) => inner.exec_error(),
            _ => None,
        }
    }

    fn clear_overlap(&mut self) {
        let Some(Cause::Structured(inner)) = self.cause.as_mut() else { return };
        if self.path == inner.path {
            inner.path = None;
        }
        if self.op == inner.op {
            inner.op = None;
        }
        if self.func == inner.func {
            inner.func = None;
        }
        if self.class == inner.class {
            inner.class = Class::Unclassified;
        }
    }
}

fn pad(b: &mut String, sep: &str) {
    if !b.is_empty() {
        b.push_str(sep);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = String::new();
        if let Some(op) = self.op {
            pad(&mut b, ": ");
            b.push_str(op.0);
        }
        if let Some(path) = &self.path {
            pad(&mut b, ": ");
            b.push_str("pkg ");
            b.push_str(&path.relative());
        }
        if let Some(func) = &self.func {
            pad(&mut b, ": ");
            b.push_str("fn ");
            b.push_str(func.as_str());
        }
        if self.class != Class::Unclassified {
            pad(&mut b, ": ");
            b.push_str(&self.class.to_string());
        }
        match &self.cause {
            Some(Cause::Structured(inner)) => {
                if !inner.is_zero() {
                    pad(&mut b, ":\n\t");
                    b.push_str(&inner.to_string());
                }
            }
            Some(other) => {
                pad(&mut b, ": ");
                b.push_str(&other.to_string());
            }
            None => {}
        }
        if b.is_empty() {
            return f.write_str("no error");
        }
        f.write_str(&b)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.cause.as_ref()? {
            Cause::Structured(e) => Some(e.as_ref()),
            Cause::Exec(e) => Some(e),
            Cause::ResultParse(e) => Some(e),
            Cause::AlreadyReported(_) => None,
            Cause::Other(e) => Some(e.as_ref()),
        }
    }
}

/// Builds one error frame. Overlapping fields are cleared from a wrapped
/// structured frame in [`ErrorBuilder::build`].
#[derive(Debug, Default)]
pub struct ErrorBuilder {
    inner: Error,
}

impl ErrorBuilder {
    pub fn op(mut self, op: Op) -> Self {
        self.inner.op = Some(op);
        self
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.path = Some(PkgPath::new(path));
        self
    }

    pub fn func(mut self, func: FnId) -> Self {
        self.inner.func = Some(func);
        self
    }

    pub fn class(mut self, class: Class) -> Self {
        self.inner.class = class;
        self
    }

    pub fn wrap(mut self, err: Error) -> Self {
        self.inner.cause = Some(Cause::Structured(Box::new(err)));
        self
    }

    pub fn exec(mut self, err: ExecError) -> Self {
        self.inner.cause = Some(Cause::Exec(err));
        self
    }

    pub fn result_parse(mut self, err: ResultParseError) -> Self {
        self.inner.cause = Some(Cause::ResultParse(err));
        self
    }

    /// Wrap a plain (non-structured) error.
    pub fn source(mut self, err: impl Into<BoxError>) -> Self {
        self.inner.cause = Some(Cause::Other(err.into()));
        self
    }

    /// Wrap a plain message.
    pub fn msg(self, msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        self.source(msg)
    }

    pub fn build(mut self) -> Error {
        self.inner.clear_overlap();
        self.inner
    }
}
