//! Package context: one `ConfigMap` per package exposing its name to the
//! functions that follow.

use std::path::Path;

use kpipe_core::resource::LOCAL_CONFIG_ANNOTATION;
use kpipe_core::prelude::*;
use metrics::counter;
use serde_json::json;
use tracing::debug;

pub const PKG_CONTEXT_FILE: &str = "package-context.yaml";
pub const PKG_CONTEXT_NAME: &str = "kptfile.kpt.dev";

const PKG_CONTEXT: Op = Op("builtins.pkgContext");

fn config_map_gvk() -> Gvk { Gvk::new("", "v1", "ConfigMap") }
fn kptfile_gvk() -> Gvk { Gvk::new("kpt.dev", "v1", "Kptfile") }

/// Resources after synthesis plus one info result per generated context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PkgContextOutput {
    pub resources: Vec<Resource>,
    pub results: Vec<ResultItem>,
}

pub fn is_pkg_context(r: &Resource) -> bool {
    r.gvk() == config_map_gvk() && r.name() == PKG_CONTEXT_NAME
}

/// Drop every existing package context and generate a fresh one next to
/// each Kptfile. Other resources keep their order; generated contexts are
/// appended in Kptfile order.
pub fn generate(items: Vec<Resource>) -> Result<PkgContextOutput, Error> {
    let mut resources = Vec::with_capacity(items.len() + 1);
    let mut contexts = Vec::new();
    for r in items {
        if is_pkg_context(&r) {
            continue;
        }
        if r.gvk() == kptfile_gvk() {
            contexts.push(context_for(&r)?);
        }
        resources.push(r);
    }

    let mut results = Vec::with_capacity(contexts.len());
    for cm in contexts {
        let path = cm.file_annotations().map(|a| a.path).unwrap_or_default();
        debug!(path = %path, "generated package context");
        counter!("pkg_context_generated_total", 1);
        results.push(ResultItem::info("generated package context").with_file(path));
        resources.push(cm);
    }
    Ok(PkgContextOutput { resources, results })
}

fn context_for(kptfile: &Resource) -> Result<Resource, Error> {
    let kf_path = kptfile.file_annotations().map_err(|e| {
        Error::builder().op(PKG_CONTEXT).msg(format!("{:#}", e)).build()
    })?;
    let dir = Path::new(&kf_path.path).parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
    let path = if dir.is_empty() { PKG_CONTEXT_FILE.to_string() } else { format!("{}/{}", dir, PKG_CONTEXT_FILE) };

    let mut cm = base_context(kptfile.name())
        .map_err(|e| Error::builder().op(PKG_CONTEXT).msg(format!("{:#}", e)).build())?;
    cm.set_file_annotations(&path, 0);
    Ok(cm)
}

fn base_context(name: &str) -> anyhow::Result<Resource> {
    let v = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": PKG_CONTEXT_NAME,
            "annotations": { (LOCAL_CONFIG_ANNOTATION): "true" },
        },
        "data": { "name": name },
    });
    Resource::from_value(v)
}

/// Package context with a placeholder name, for abstract blueprints.
pub fn dummy_pkg_context() -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n  annotations:\n    {}: \"true\"\ndata:\n  name: example\n",
        PKG_CONTEXT_NAME, LOCAL_CONFIG_ANNOTATION
    )
}
