#![cfg(unix)]
#![forbid(unsafe_code)]

use kpipe_core::{Resource, ResultList};
use kpipe_fnruntime::{BufferReporter, ExecFn, ExecPolicy, FnExecutor, Function, FunctionRunner, Truncation};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> ExecFn {
    ExecFn::new("sh", ExecPolicy::default()).with_args(["-c".to_string(), script.to_string()])
}

fn deployment() -> Resource {
    let mut r = Resource::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web"},
        "spec": {"replicas": 3}
    }))
    .unwrap();
    r.set_file_annotations("deploy.yaml", 0);
    r
}

#[tokio::test]
async fn cat_round_trips_resources_and_provenance() {
    let out = sh("cat").execute(&[deployment()], None, &CancellationToken::new()).await.unwrap();
    assert_eq!(out.resources, vec![deployment()]);
    assert_eq!(out.resources[0].file_annotations().unwrap().path, "deploy.yaml");
    assert!(out.results.is_none());
}

#[tokio::test]
async fn function_config_reaches_the_process() {
    let cfg = Resource::from_value(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "function-input"}, "data": {"k": "v"}})).unwrap();
    let f = sh("grep -q 'functionConfig:' && printf 'apiVersion: config.kubernetes.io/v1\\nkind: ResourceList\\nitems: []\\n'");
    let out = f.execute(&[deployment()], Some(&cfg), &CancellationToken::new()).await.unwrap();
    assert!(out.resources.is_empty());
}

#[tokio::test]
async fn env_policy_is_applied() {
    let policy = ExecPolicy { env: vec!["KPIPE_FN_GREETING=hello".into()], ..Default::default() };
    let f = ExecFn::new("sh", policy).with_args([
        "-c".to_string(),
        "cat >/dev/null; test \"$KPIPE_FN_GREETING\" = hello || exit 9; printf 'apiVersion: config.kubernetes.io/v1\\nkind: ResourceList\\nitems: []\\n'".to_string(),
    ]);
    let out = f.execute(&[], None, &CancellationToken::new()).await;
    match out {
        Ok(out) => assert!(out.resources.is_empty()),
        Err(e) => panic!("{}", e.reason),
    }
}

#[tokio::test]
async fn runner_over_a_failing_executable() {
    let f = Function::exec("sh");
    let runner = FunctionRunner::new(
        &f,
        Box::new(sh("cat >/dev/null; echo 'replicas must be < 3' >&2; exit 1")),
        None,
        Truncation::default(),
    );
    let mut rep = BufferReporter::default();
    let mut ledger = ResultList::new();
    let err = runner.run(&[deployment()], &mut rep, &mut ledger, &CancellationToken::new()).await.unwrap_err();
    assert!(err.is_already_reported());
    assert_eq!(ledger.items()[0].exec_path, "sh");
    assert_eq!(ledger.items()[0].stderr, "replicas must be < 3\n");
    assert!(rep.err.contains("    \"replicas must be < 3\"\n  Exit code: 1\n"), "{}", rep.err);
}
