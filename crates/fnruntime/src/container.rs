//! Container functions, run through a docker-compatible CLI.

use anyhow::{anyhow, Context};
use kpipe_core::Resource;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{ExecFailure, ExecPolicy, FailureReason, FnExecutor, FnOutput};
use crate::process;

/// User the function runs as unless `as_current_user` is set.
const DEFAULT_USER: &str = "nobody";

#[derive(Debug, Clone)]
pub struct ContainerFn {
    image: String,
    policy: ExecPolicy,
    runtime: String,
}

impl ContainerFn {
    pub fn new(image: impl Into<String>, policy: ExecPolicy, runtime: impl Into<String>) -> Self {
        Self { image: image.into(), policy, runtime: runtime.into() }
    }

    pub fn image(&self) -> &str { &self.image }

    /// Arguments for `<runtime> run ...`; `user` is the resolved `--user` value.
    pub fn run_args(&self, name: &str, user: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-i".into(),
            "--name".into(),
            name.into(),
            "--network".into(),
            if self.policy.network { "host".into() } else { "none".into() },
            "--user".into(),
            user.into(),
            "--security-opt=no-new-privileges".into(),
        ];
        for m in &self.policy.mounts {
            args.push("--mount".into());
            args.push(m.to_arg());
        }
        for (k, v) in self.policy.resolved_env() {
            args.push("-e".into());
            args.push(format!("{}={}", k, v));
        }
        args.push(self.image.clone());
        args
    }

    async fn user(&self) -> anyhow::Result<String> {
        if !self.policy.as_current_user {
            return Ok(DEFAULT_USER.to_string());
        }
        let uid = id_flag("-u").await?;
        let gid = id_flag("-g").await?;
        Ok(format!("{}:{}", uid, gid))
    }

    /// Best-effort removal of a container left running after cancellation.
    async fn kill(&self, name: &str) {
        let res = Command::new(&self.runtime).args(["kill", name]).output().await;
        match res {
            Ok(out) if out.status.success() => debug!(container = %name, "killed cancelled function container"),
            Ok(out) => debug!(container = %name, stderr = %String::from_utf8_lossy(&out.stderr), "container kill reported failure"),
            Err(e) => warn!(container = %name, error = %e, "failed to kill function container"),
        }
    }
}

async fn id_flag(flag: &str) -> anyhow::Result<String> {
    let out = Command::new("id").arg(flag).output().await.context("running `id`")?;
    if !out.status.success() {
        return Err(anyhow!("`id {}` exited with {}", flag, out.status));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

#[async_trait::async_trait]
impl FnExecutor for ContainerFn {
    async fn execute(
        &self,
        input: &[Resource],
        config: Option<&Resource>,
        cancel: &CancellationToken,
    ) -> Result<FnOutput, ExecFailure> {
        let stdin = process::encode(input, config)?;
        let user = self.user().await.map_err(FailureReason::Launch)?;
        let name = format!("kpipe-fn-{}", uuid::Uuid::new_v4());
        let args = self.run_args(&name, &user);
        info!(image = %self.image, container = %name, network = self.policy.network, "starting function container");

        let mut cmd = Command::new(&self.runtime);
        cmd.args(&args);
        match process::run_with_input(cmd, stdin, cancel).await {
            Ok(out) => process::finish(out),
            Err(FailureReason::Cancelled) => {
                self.kill(&name).await;
                Err(FailureReason::Cancelled.into())
            }
            Err(reason) => Err(reason.into()),
        }
    }
}
