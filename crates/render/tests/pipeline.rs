#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use kpipe_core::{Error, ExecError, Resource};
use kpipe_fnruntime::{
    BufferReporter, ExecFailure, ExecutorFactory, FnExecutor, FnOutput, Function, Truncation,
};
use kpipe_render::{Pipeline, Renderer};
use serde_json::json;
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<(String, Vec<Resource>)>>>;

/// `fn/label-<x>` appends `<x>` to the `steps` annotation, `fn/fail` exits 1, `fn/drop`
/// returns nothing, anything else echoes its input.
struct Fake {
    image: String,
    log: Log,
}

#[async_trait::async_trait]
impl FnExecutor for Fake {
    async fn execute(
        &self,
        input: &[Resource],
        config: Option<&Resource>,
        _cancel: &CancellationToken,
    ) -> Result<FnOutput, ExecFailure> {
        self.log.lock().unwrap().push((self.image.clone(), input.to_vec()));
        if self.image == "fn/fail" {
            return Err(ExecFailure { reason: ExecError::new(1, "failed\n").into(), results: None });
        }
        if self.image == "fn/drop" {
            return Ok(FnOutput::default());
        }
        let mut out = input.to_vec();
        if let Some(step) = self.image.strip_prefix("fn/label-") {
            let seen = config.map(|c| c.as_value()["data"]["seen"].as_str().unwrap_or("").to_string());
            for r in &mut out {
                let prior = r.annotation("steps").unwrap_or("").to_string();
                r.set_annotation("steps", &format!("{}{}", prior, step));
                if let Some(s) = &seen {
                    r.set_annotation("seen", s);
                }
            }
        }
        Ok(FnOutput { resources: out, results: None })
    }
}

#[derive(Default)]
struct FakeFactory {
    log: Log,
}

impl FakeFactory {
    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(i, _)| i.clone()).collect()
    }

    fn input_of(&self, n: usize) -> Vec<Resource> {
        self.log.lock().unwrap()[n].1.clone()
    }
}

impl ExecutorFactory for FakeFactory {
    fn executor(&self, f: &Function) -> Result<Box<dyn FnExecutor>, Error> {
        Ok(Box::new(Fake { image: f.id().to_string(), log: self.log.clone() }))
    }
}

fn with_path(v: serde_json::Value, path: &str, index: usize) -> Resource {
    let mut r = Resource::from_value(v).unwrap();
    r.set_file_annotations(path, index);
    r
}

fn package() -> Vec<Resource> {
    vec![
        with_path(json!({"apiVersion": "kpt.dev/v1", "kind": "Kptfile", "metadata": {"name": "example"}}), "Kptfile", 0),
        with_path(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}}), "deploy.yaml", 0),
    ]
}

fn mutators(images: &[&str]) -> Pipeline {
    Pipeline { mutators: images.iter().map(|i| Function::image(*i)).collect(), validators: Vec::new() }
}

fn pkg_root() -> std::path::PathBuf {
    std::env::temp_dir()
}

#[tokio::test]
async fn end_to_end_single_echo_function() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut rep = BufferReporter::default();
    let out = renderer
        .render(&pkg_root(), package(), &mutators(&["fn/echo"]), &mut rep, &CancellationToken::new())
        .await;

    let resources = out.resources.unwrap();
    assert_eq!(out.results.len(), 1);
    assert_eq!(out.results.exit_code(), 0);
    assert_eq!(out.results.items()[0].exit_code, 0);

    let seen = factory.input_of(0);
    let ctx = seen.iter().find(|r| r.name() == "kptfile.kpt.dev").expect("context visible to the function");
    assert_eq!(ctx.as_value()["data"], json!({"name": "example"}));

    let mut expected = package();
    expected.push(ctx.clone());
    assert_eq!(resources, expected);
    assert_eq!(rep.out, "[RUNNING] \"fn/echo\"\n[PASS] \"fn/echo\"\n");
}

#[tokio::test]
async fn functions_run_in_declaration_order_threading_output() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let out = renderer
        .render(
            &pkg_root(),
            package(),
            &mutators(&["fn/label-a", "fn/label-b", "fn/label-c"]),
            &mut BufferReporter::default(),
            &CancellationToken::new(),
        )
        .await;
    let resources = out.resources.unwrap();
    assert!(resources.iter().all(|r| r.annotation("steps") == Some("abc")));
    assert_eq!(factory.calls(), vec!["fn/label-a", "fn/label-b", "fn/label-c"]);
    assert!(factory.input_of(1).iter().all(|r| r.annotation("steps") == Some("a")));
    assert!(factory.input_of(2).iter().all(|r| r.annotation("steps") == Some("ab")));
}

#[tokio::test]
async fn failure_keeps_ledger_up_to_the_failing_function() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut rep = BufferReporter::default();
    let out = renderer
        .render(
            &pkg_root(),
            package(),
            &mutators(&["fn/label-a", "fn/fail", "fn/label-c"]),
            &mut rep,
            &CancellationToken::new(),
        )
        .await;

    let err = out.resources.unwrap_err();
    assert!(err.is_already_reported());
    assert_eq!(err.exec_error().map(|e| e.exit_code), Some(1));
    assert_eq!(out.results.len(), 2);
    assert_eq!(out.results.exit_code(), 1);
    assert_eq!(factory.calls(), vec!["fn/label-a", "fn/fail"]);
    assert!(rep.err.contains("  Exit code: 1\n"));
}

#[tokio::test]
async fn invalid_declaration_stops_before_any_launch() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut bad = Function::image("fn/label-b");
    bad.exec = Some("./fn".into());
    let pipeline = Pipeline { mutators: vec![Function::image("fn/label-a"), bad], validators: Vec::new() };
    let out = renderer
        .render(&pkg_root(), package(), &pipeline, &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    let err = out.resources.unwrap_err();
    assert!(err.to_string().contains("invalid parameter value"), "{}", err);
    assert!(factory.calls().is_empty());
    assert!(out.results.is_empty());
}

#[tokio::test]
async fn config_map_reaches_the_function() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut f = Function::image("fn/label-a");
    f.config_map.insert("seen".into(), "yes".into());
    let pipeline = Pipeline { mutators: vec![f], validators: Vec::new() };
    let out = renderer
        .render(&pkg_root(), package(), &pipeline, &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    assert!(out.resources.unwrap().iter().all(|r| r.annotation("seen") == Some("yes")));
}

#[tokio::test]
async fn validators_see_mutated_resources_and_cannot_change_them() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let pipeline = Pipeline {
        mutators: vec![Function::image("fn/label-a")],
        validators: vec![Function::image("fn/drop")],
    };
    let out = renderer
        .render(&pkg_root(), package(), &pipeline, &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    let resources = out.resources.unwrap();
    assert_eq!(resources.len(), 3);
    assert_eq!(out.results.len(), 2);
    assert!(factory.input_of(1).iter().all(|r| r.annotation("steps") == Some("a")));
}

#[tokio::test]
async fn failing_validator_fails_the_render() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let pipeline = Pipeline { mutators: vec![Function::image("fn/echo")], validators: vec![Function::image("fn/fail")] };
    let out = renderer
        .render(&pkg_root(), package(), &pipeline, &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    assert!(out.resources.unwrap_err().is_already_reported());
    assert_eq!(out.results.len(), 2);
}

#[tokio::test]
async fn missing_config_file_is_reported_with_context() {
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut f = Function::image("fn/echo");
    f.config_path = Some(format!("missing-{}.yaml", uuid::Uuid::new_v4()));
    let pipeline = Pipeline { mutators: vec![f], validators: Vec::new() };
    let out = renderer
        .render(&pkg_root(), package(), &pipeline, &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    let err = out.resources.unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("fn.render: pkg "), "{}", msg);
    assert!(msg.contains("missing function config"), "{}", msg);
    assert!(factory.calls().is_empty());
}

fn write(root: &std::path::Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn package_tree() -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!("kpipe-tree-{}", uuid::Uuid::new_v4()));
    write(
        &root,
        "Kptfile",
        "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: app\npipeline:\n  mutators:\n  - image: fn/label-r\n",
    );
    write(&root, "deploy.yaml", "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n");
    write(
        &root,
        "db/Kptfile",
        "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: db\npipeline:\n  mutators:\n  - image: fn/label-d\n",
    );
    write(&root, "db/sts.yaml", "apiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: pg\n");
    write(&root, "cache/Kptfile", "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: cache\n");
    root
}

#[tokio::test]
async fn subpackages_render_first_and_feed_the_parent() {
    let root = package_tree();
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let mut rep = BufferReporter::default();
    let out = renderer.hydrate(&root, &mut rep, &CancellationToken::new()).await;

    let resources = out.resources.unwrap();
    assert_eq!(factory.calls(), vec!["fn/label-d", "fn/label-r"]);
    assert_eq!(out.results.len(), 2);
    assert_eq!(out.results.items()[0].image, "fn/label-d");

    let sts = resources.iter().find(|r| r.kind() == "StatefulSet").unwrap();
    assert_eq!(sts.file_annotations().unwrap().path, "db/sts.yaml");
    assert_eq!(sts.annotation("steps"), Some("dr"));
    let deploy = resources.iter().find(|r| r.kind() == "Deployment").unwrap();
    assert_eq!(deploy.annotation("steps"), Some("r"));

    let mut ctx_paths: Vec<String> = resources
        .iter()
        .filter(|r| r.name() == "kptfile.kpt.dev")
        .map(|r| r.file_annotations().unwrap().path)
        .collect();
    ctx_paths.sort();
    assert_eq!(ctx_paths, vec!["cache/package-context.yaml", "db/package-context.yaml", "package-context.yaml"]);

    let cache_at = rep.out.find("Package \"cache\":").unwrap();
    let db_at = rep.out.find("Package \"db\":").unwrap();
    assert!(cache_at < db_at, "{}", rep.out);
    assert!(out.files.contains("db/sts.yaml"));
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn subpackage_failure_halts_the_tree() {
    let root = package_tree();
    write(
        &root,
        "db/Kptfile",
        "apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: db\npipeline:\n  mutators:\n  - image: fn/fail\n",
    );
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let out = renderer.hydrate(&root, &mut BufferReporter::default(), &CancellationToken::new()).await;
    assert!(out.resources.unwrap_err().is_already_reported());
    assert_eq!(factory.calls(), vec!["fn/fail"]);
    assert_eq!(out.results.len(), 1);
    assert_eq!(out.results.exit_code(), 1);
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn eval_runs_one_function_over_the_whole_tree() {
    let root = package_tree();
    let factory = FakeFactory::default();
    let renderer = Renderer::new(&factory, Truncation::default());
    let out = renderer
        .eval(&root, &Function::image("fn/label-x"), &mut BufferReporter::default(), &CancellationToken::new())
        .await;
    let resources = out.resources.unwrap();
    assert_eq!(resources.len(), 5);
    assert!(resources.iter().all(|r| r.annotation("steps") == Some("x")));
    assert!(!resources.iter().any(|r| r.name() == "kptfile.kpt.dev"));
    assert_eq!(out.results.len(), 1);
    std::fs::remove_dir_all(&root).ok();
}
