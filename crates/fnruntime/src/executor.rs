//! The execution boundary: run one function over a resource collection.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use kpipe_core::{ExecError, Resource};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

/// Successful function output.
#[derive(Debug, Clone, Default)]
pub struct FnOutput {
    pub resources: Vec<Resource>,
    /// Raw results document, if the function emitted one.
    pub results: Option<Json>,
}

#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    Exit(#[from] ExecError),
    #[error("function cancelled")]
    Cancelled,
    #[error("failed to run function: {0:#}")]
    Launch(anyhow::Error),
    #[error("invalid function output: {0:#}")]
    Output(anyhow::Error),
}

/// A failed invocation. Functions often emit results before exiting
/// non-zero, so whatever was decoded from the output stream rides along.
#[derive(Debug)]
pub struct ExecFailure {
    pub reason: FailureReason,
    pub results: Option<Json>,
}

impl From<FailureReason> for ExecFailure {
    fn from(reason: FailureReason) -> Self {
        Self { reason, results: None }
    }
}

/// Runs a single function. Implementations own their execution policy and
/// must stop the underlying process when `cancel` fires.
#[async_trait::async_trait]
pub trait FnExecutor: Send + Sync {
    async fn execute(
        &self,
        input: &[Resource],
        config: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<FnOutput, ExecFailure>;
}

/// A filesystem mount for container functions, in `docker run --mount`
/// syntax. Mounts are read-only unless `rw=true` is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    fields: Vec<(String, Option<String>)>,
    read_write: bool,
}

impl Mount {
    pub fn read_write(&self) -> bool { self.read_write }

    /// Value handed to `--mount`.
    pub fn to_arg(&self) -> String {
        let mut parts: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{}={}", k, v),
                None => k.clone(),
            })
            .collect();
        if !self.read_write {
            parts.push("readonly".to_string());
        }
        parts.join(",")
    }
}

impl FromStr for Mount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = Vec::new();
        let mut read_write = false;
        let mut has_type = false;
        let mut has_target = false;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = match part.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (part.to_string(), None),
            };
            match k.as_str() {
                "rw" => {
                    read_write = matches!(v.as_deref(), Some("true") | None);
                    continue;
                }
                "readonly" | "ro" => continue,
                "type" => has_type = true,
                "target" | "dst" | "destination" => has_target = true,
                _ => {}
            }
            fields.push((k, v));
        }
        if !has_type {
            return Err(anyhow!("mount {:?} must specify type", s));
        }
        if !has_target {
            return Err(anyhow!("mount {:?} must specify target", s));
        }
        Ok(Self { fields, read_write })
    }
}

/// Policy applied when launching function processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecPolicy {
    pub network: bool,
    pub mounts: Vec<Mount>,
    /// `KEY=VALUE`, or a bare `KEY` exported from the host environment.
    pub env: Vec<String>,
    pub as_current_user: bool,
}

impl ExecPolicy {
    /// Expand env entries into `KEY=VALUE` pairs. Bare keys missing from the
    /// host environment are dropped.
    pub fn resolved_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .filter_map(|e| match e.split_once('=') {
                Some((k, v)) => Some((k.to_string(), v.to_string())),
                None => std::env::var(e).ok().map(|v| (e.clone(), v)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mounts_default_to_readonly() {
        let m: Mount = "type=bind,src=/tmp/data,dst=/data".parse().unwrap();
        assert!(!m.read_write());
        assert_eq!(m.to_arg(), "type=bind,src=/tmp/data,dst=/data,readonly");

        let m: Mount = "type=bind,src=/tmp/data,dst=/data,rw=true".parse().unwrap();
        assert!(m.read_write());
        assert_eq!(m.to_arg(), "type=bind,src=/tmp/data,dst=/data");

        let m: Mount = "type=volume,target=/cache,readonly".parse().unwrap();
        assert_eq!(m.to_arg(), "type=volume,target=/cache,readonly");
    }

    #[test]
    fn mounts_require_type_and_target() {
        assert!("src=/a,dst=/b".parse::<Mount>().is_err());
        assert!("type=bind,src=/a".parse::<Mount>().is_err());
    }

    #[test]
    fn env_entries_resolve_from_host() {
        std::env::set_var("KPIPE_TEST_ENV_PASSTHROUGH", "yes");
        let policy = ExecPolicy {
            env: vec!["A=1".into(), "KPIPE_TEST_ENV_PASSTHROUGH".into(), "KPIPE_TEST_ENV_UNSET_XYZ".into()],
            ..Default::default()
        };
        assert_eq!(
            policy.resolved_env(),
            vec![("A".to_string(), "1".to_string()), ("KPIPE_TEST_ENV_PASSTHROUGH".to_string(), "yes".to_string())]
        );
    }
}
