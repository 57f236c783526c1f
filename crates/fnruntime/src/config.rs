//! Resolve a function declaration into the `functionConfig` resource.

use std::path::Path;

use kpipe_core::{Class, Error, Op, Resource};
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use crate::function::Function;

const READ_CONFIG: Op = Op("fn.readConfig");

/// Name of the ConfigMap synthesized from a `configMap` declaration.
pub const FUNCTION_INPUT_NAME: &str = "function-input";

/// Produce the configuration resource for `f`, or `None` when it has none.
///
/// Sources are checked in order: `configPath` (relative to `pkg_root`),
/// inline `config`, then `configMap`. The first one set wins.
pub fn resolve_fn_config(f: &Function, pkg_root: &Path) -> Result<Option<Resource>, Error> {
    let fail = |class: Class, msg: String| Error::builder().op(READ_CONFIG).func(f.id()).class(class).msg(msg).build();

    if let Some(rel) = f.config_file() {
        let path = pkg_root.join(rel);
        let raw = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(fail(Class::MissingParam, format!("missing function config {:?}", rel)));
            }
            Err(e) => {
                return Err(Error::builder().op(READ_CONFIG).func(f.id()).source(e).build());
            }
        };
        let node = Resource::from_yaml(&raw)
            .map_err(|e| fail(Class::InvalidParam, format!("invalid function config {:?} {:#}", rel, e)))?;
        debug!(fn_id = %f.id(), path = %path.display(), "function config read from file");
        return Ok(Some(node));
    }

    if let Some(inline) = f.inline_config() {
        let node = Resource::from_value(inline.clone())
            .map_err(|e| fail(Class::InvalidParam, format!("invalid inline function config: {:#}", e)))?;
        return Ok(Some(node));
    }

    if !f.config_map.is_empty() {
        let data: Map<String, Json> = f.config_map.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect();
        let node = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": FUNCTION_INPUT_NAME },
            "data": data,
        });
        return Resource::from_value(node).map(Some).map_err(|e| fail(Class::Internal, format!("{:#}", e)));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("kpipe-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn config_path_wins_over_inline() {
        let dir = scratch_dir();
        std::fs::write(dir.join("cfg.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: from-file\n").unwrap();
        let mut f = Function::image("fn");
        f.config_path = Some("cfg.yaml".into());
        f.config = Some(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "inline"}}));
        let cfg = resolve_fn_config(&f, &dir).unwrap().unwrap();
        assert_eq!(cfg.name(), "from-file");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_and_invalid_files_are_classified() {
        let dir = scratch_dir();
        let mut f = Function::image("fn");
        f.config_path = Some("nope.yaml".into());
        let err = resolve_fn_config(&f, &dir).unwrap_err();
        assert_eq!(err.class(), Class::MissingParam);
        assert!(err.to_string().contains("missing function config \"nope.yaml\""), "{}", err);

        std::fs::write(dir.join("bad.yaml"), "a: [unclosed\n").unwrap();
        f.config_path = Some("bad.yaml".into());
        let err = resolve_fn_config(&f, &dir).unwrap_err();
        assert_eq!(err.class(), Class::InvalidParam);
        assert!(err.to_string().contains("invalid function config \"bad.yaml\""), "{}", err);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn inline_config_is_used_verbatim() {
        let mut f = Function::image("fn");
        f.config = Some(json!({"apiVersion": "fn.kpt.dev/v1", "kind": "SetLabels", "labels": {"a": "b"}}));
        let cfg = resolve_fn_config(&f, Path::new(".")).unwrap().unwrap();
        assert_eq!(cfg.as_value(), f.config.as_ref().unwrap());
    }

    #[test]
    fn config_map_becomes_function_input() {
        let mut f = Function::image("fn");
        f.config_map.insert("namespace".into(), "prod".into());
        let cfg = resolve_fn_config(&f, Path::new(".")).unwrap().unwrap();
        assert_eq!(cfg.kind(), "ConfigMap");
        assert_eq!(cfg.name(), FUNCTION_INPUT_NAME);
        assert_eq!(cfg.as_value()["data"]["namespace"], "prod");
    }

    #[test]
    fn no_config_resolves_to_none() {
        let f = Function::image("fn");
        assert!(resolve_fn_config(&f, Path::new(".")).unwrap().is_none());
        let mut empty_map = Function::image("fn");
        empty_map.config_map.clear();
        assert!(resolve_fn_config(&empty_map, Path::new(".")).unwrap().is_none());
    }
}
