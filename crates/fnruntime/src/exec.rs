//! Functions implemented as local executables.

use std::path::PathBuf;

use kpipe_core::Resource;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::executor::{ExecFailure, ExecPolicy, FnExecutor, FnOutput};
use crate::process;

#[derive(Debug, Clone)]
pub struct ExecFn {
    path: PathBuf,
    args: Vec<String>,
    policy: ExecPolicy,
}

impl ExecFn {
    pub fn new(path: impl Into<PathBuf>, policy: ExecPolicy) -> Self {
        Self { path: path.into(), args: Vec::new(), policy }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

#[async_trait::async_trait]
impl FnExecutor for ExecFn {
    async fn execute(
        &self,
        input: &[Resource],
        config: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<FnOutput, ExecFailure> {
        let stdin = process::encode(input, config)?;
        info!(exec = %self.path.display(), "starting function executable");
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args).envs(self.policy.resolved_env());
        let out = process::run_with_input(cmd, stdin, cancel).await?;
        process::finish(out)
    }
}
