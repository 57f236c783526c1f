//! Kptfile: package root marker carrying the function pipeline.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use kpipe_core::Resource;
use kpipe_fnruntime::Function;
use serde::{Deserialize, Serialize};

pub const KPTFILE_NAME: &str = "Kptfile";
pub const KPTFILE_API_VERSION: &str = "kpt.dev/v1";
pub const KPTFILE_KIND: &str = "Kptfile";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Function>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Function>,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty() && self.validators.is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.mutators.iter().chain(self.validators.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KptfileMeta {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kptfile {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: KptfileMeta,
    #[serde(default)]
    pub pipeline: Pipeline,
}

impl Kptfile {
    pub fn from_resource(r: &Resource) -> Result<Self> {
        let kf: Kptfile = serde_json::from_value(r.as_value().clone()).context("decoding Kptfile")?;
        if kf.kind != KPTFILE_KIND {
            return Err(anyhow!("expected kind {}, got {:?}", KPTFILE_KIND, kf.kind));
        }
        if kf.api_version != KPTFILE_API_VERSION {
            return Err(anyhow!("unsupported Kptfile apiVersion {:?}", kf.api_version));
        }
        Ok(kf)
    }

    /// Read `<dir>/Kptfile`.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(KPTFILE_NAME);
        let src = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let r = Resource::from_yaml(&src).with_context(|| format!("parsing {}", path.display()))?;
        Self::from_resource(&r).with_context(|| format!("in {}", path.display()))
    }
}

pub fn is_package_dir(dir: &Path) -> bool {
    dir.join(KPTFILE_NAME).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_is_decoded() {
        let r = Resource::from_yaml(
            r#"
apiVersion: kpt.dev/v1
kind: Kptfile
metadata:
  name: app
pipeline:
  mutators:
    - image: gcr.io/kpt-fn/set-labels:v0.1
      configMap:
        app: web
    - exec: ./bin/fmt
  validators:
    - image: gcr.io/kpt-fn/kubeval:v0.3
"#,
        )
        .unwrap();
        let kf = Kptfile::from_resource(&r).unwrap();
        assert_eq!(kf.metadata.name, "app");
        assert_eq!(kf.pipeline.mutators.len(), 2);
        assert_eq!(kf.pipeline.mutators[0].config_map.get("app").map(String::as_str), Some("web"));
        assert_eq!(kf.pipeline.mutators[1].exec_path(), Some("./bin/fmt"));
        assert_eq!(kf.pipeline.functions().count(), 3);
    }

    #[test]
    fn pipeline_is_optional() {
        let r = Resource::from_yaml("apiVersion: kpt.dev/v1\nkind: Kptfile\nmetadata:\n  name: bare\n").unwrap();
        assert!(Kptfile::from_resource(&r).unwrap().pipeline.is_empty());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let r = Resource::from_yaml("apiVersion: kpt.dev/v1\nkind: ConfigMap\nmetadata:\n  name: x\n").unwrap();
        assert!(Kptfile::from_resource(&r).is_err());
    }
}
