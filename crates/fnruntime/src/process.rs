//! Child-process plumbing shared by the container and exec executors.

use std::process::Stdio;

use anyhow::anyhow;
use kpipe_core::{ExecError, Resource};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::{ExecFailure, FailureReason, FnOutput};
use crate::wire;

pub(crate) struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Spawn `cmd`, feed it `input` and collect its output. The child is killed
/// when `cancel` fires.
pub(crate) async fn run_with_input(
    mut cmd: Command,
    input: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, FailureReason> {
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| FailureReason::Launch(anyhow!(e).context("spawning function process")))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| FailureReason::Launch(anyhow!("function process has no stdin")))?;

    let write = async move {
        let res = stdin.write_all(&input).await;
        drop(stdin);
        res
    };
    let run = async move { tokio::join!(write, child.wait_with_output()) };

    tokio::select! {
        _ = cancel.cancelled() => Err(FailureReason::Cancelled),
        (written, output) = run => {
            if let Err(e) = written {
                // A function may exit without draining its input.
                debug!(error = %e, "writing function input failed");
            }
            let output = output.map_err(|e| FailureReason::Launch(anyhow!(e).context("waiting for function process")))?;
            Ok(ProcessOutput {
                exit_code: exit_code(&output.status),
                stdout: output.stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

pub(crate) fn encode(input: &[Resource], config: Option<&Resource>) -> Result<Vec<u8>, ExecFailure> {
    wire::encode_input(input, config)
        .map(String::into_bytes)
        .map_err(|e| FailureReason::Launch(e.context("encoding function input")).into())
}

/// Turn a finished process into the executor contract.
pub(crate) fn finish(out: ProcessOutput) -> Result<FnOutput, ExecFailure> {
    if out.exit_code != 0 {
        // Results are best-effort on failure; the exit code is what counts.
        let results = if out.stdout.is_empty() {
            None
        } else {
            wire::decode_output(&out.stdout).ok().and_then(|d| d.results)
        };
        return Err(ExecFailure { reason: ExecError::new(out.exit_code, out.stderr).into(), results });
    }
    if !out.stderr.is_empty() {
        debug!(stderr = %out.stderr, "function stderr");
    }
    let decoded = wire::decode_output(&out.stdout).map_err(FailureReason::Output)?;
    Ok(FnOutput { resources: decoded.items, results: decoded.results })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_stdout_stderr_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "cat; echo oops >&2; exit 3"]);
        let out = run_with_input(cmd, b"hello".to_vec(), &CancellationToken::new()).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn cancellation_stops_the_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let res = run_with_input(cmd, Vec::new(), &cancel).await;
        assert!(matches!(res, Err(FailureReason::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn non_zero_exit_keeps_emitted_results() {
        let out = ProcessOutput {
            exit_code: 1,
            stdout: b"apiVersion: config.kubernetes.io/v1\nkind: ResourceList\nitems: []\nresults:\n- message: bad\n  severity: error\n".to_vec(),
            stderr: "failed\n".into(),
        };
        let failure = finish(out).unwrap_err();
        match failure.reason {
            FailureReason::Exit(e) => {
                assert_eq!(e.exit_code, 1);
                assert_eq!(e.stderr, "failed\n");
            }
            other => panic!("unexpected reason: {:?}", other),
        }
        assert!(failure.results.is_some());
    }
}
