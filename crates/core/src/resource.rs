//! Resource collection model.
//!
//! A resource is an arbitrary KRM document kept as a JSON tree. Only
//! `apiVersion`, `kind` and `metadata` are ever interpreted; everything else
//! travels through untouched. Every resource read from a package carries its
//! originating file path and the document index within that file.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

pub const PATH_ANNOTATION: &str = "internal.config.kubernetes.io/path";
pub const INDEX_ANNOTATION: &str = "internal.config.kubernetes.io/index";
pub const LEGACY_PATH_ANNOTATION: &str = "config.kubernetes.io/path";
pub const LEGACY_INDEX_ANNOTATION: &str = "config.kubernetes.io/index";
pub const LOCAL_CONFIG_ANNOTATION: &str = "config.kubernetes.io/local-config";

/// Group/version/kind of a resource. Core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }
    }

    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

/// File provenance of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAnnotations {
    pub path: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub struct Resource(Json);

impl TryFrom<Json> for Resource {
    type Error = anyhow::Error;

    fn try_from(v: Json) -> Result<Self> {
        Self::from_value(v)
    }
}

impl From<Resource> for Json {
    fn from(r: Resource) -> Self {
        r.0
    }
}

impl Resource {
    /// Wrap a JSON value; only mappings are valid resources.
    pub fn from_value(v: Json) -> Result<Self> {
        if !v.is_object() {
            return Err(anyhow!("resource must be a mapping, got {}", type_name(&v)));
        }
        Ok(Self(v))
    }

    pub fn from_yaml(src: &str) -> Result<Self> {
        let val: serde_yaml::Value = serde_yaml::from_str(src).context("parsing YAML")?;
        let json = serde_json::to_value(val).context("converting YAML to JSON")?;
        Self::from_value(json)
    }

    pub fn as_value(&self) -> &Json { &self.0 }
    pub fn into_value(self) -> Json { self.0 }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.0).context("serializing resource")
    }

    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.0.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.annotations_mut().insert(key.to_string(), Json::String(value.to_string()));
    }

    pub fn remove_annotation(&mut self, key: &str) {
        let Some(meta) = self.0.get_mut("metadata").and_then(|m| m.as_object_mut()) else { return };
        let now_empty = match meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            Some(annos) => {
                annos.shift_remove(key);
                annos.is_empty()
            }
            None => false,
        };
        if now_empty {
            meta.shift_remove("annotations");
        }
    }

    /// Whether the resource is marked as local-only configuration.
    pub fn is_local_config(&self) -> bool {
        self.annotation(LOCAL_CONFIG_ANNOTATION) == Some("true")
    }

    /// Read path/index provenance. A missing path is reported as an empty
    /// string; a malformed index or annotations block is an error.
    pub fn file_annotations(&self) -> Result<FileAnnotations> {
        if let Some(annos) = self.0.get("metadata").and_then(|m| m.get("annotations")) {
            if !annos.is_object() && !annos.is_null() {
                return Err(anyhow!("metadata.annotations must be a mapping in {}", self.describe()));
            }
        }
        let path = self
            .annotation(PATH_ANNOTATION)
            .or_else(|| self.annotation(LEGACY_PATH_ANNOTATION))
            .unwrap_or("")
            .to_string();
        let index = match self.annotation(INDEX_ANNOTATION).or_else(|| self.annotation(LEGACY_INDEX_ANNOTATION)) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid index annotation {:?} in {}", raw, self.describe()))?,
            None => 0,
        };
        Ok(FileAnnotations { path, index })
    }

    /// Set path/index provenance, keeping the legacy keys in sync.
    pub fn set_file_annotations(&mut self, path: &str, index: usize) {
        let idx = index.to_string();
        self.set_annotation(PATH_ANNOTATION, path);
        self.set_annotation(LEGACY_PATH_ANNOTATION, path);
        self.set_annotation(INDEX_ANNOTATION, &idx);
        self.set_annotation(LEGACY_INDEX_ANNOTATION, &idx);
    }

    fn provenance(&self, path_key: &str, index_key: &str) -> (Option<String>, Option<String>) {
        (self.annotation(path_key).map(str::to_string), self.annotation(index_key).map(str::to_string))
    }

    fn put_provenance(&mut self, path_key: &str, index_key: &str, (path, index): (Option<String>, Option<String>)) {
        match path {
            Some(p) => self.set_annotation(path_key, &p),
            None => self.remove_annotation(path_key),
        }
        match index {
            Some(i) => self.set_annotation(index_key, &i),
            None => self.remove_annotation(index_key),
        }
    }

    /// Drop provenance annotations before the resource is written to disk.
    pub fn clear_file_annotations(&mut self) {
        for key in [PATH_ANNOTATION, LEGACY_PATH_ANNOTATION, INDEX_ANNOTATION, LEGACY_INDEX_ANNOTATION] {
            self.remove_annotation(key);
        }
    }

    /// `apiVersion/kind/namespace/name`, for log lines and messages.
    pub fn describe(&self) -> String {
        let mut s = format!("{}/{}", self.api_version(), self.kind());
        if let Some(ns) = self.namespace() {
            s.push('/');
            s.push_str(ns);
        }
        s.push('/');
        s.push_str(self.name());
        s
    }

    fn annotations_mut(&mut self) -> &mut Map<String, Json> {
        let Json::Object(root) = &mut self.0 else { unreachable!("resource root is always a mapping") };
        let meta = child_map(root, "metadata");
        child_map(meta, "annotations")
    }
}

fn child_map<'a>(parent: &'a mut Map<String, Json>, key: &str) -> &'a mut Map<String, Json> {
    let slot = parent.entry(key).or_insert_with(|| Json::Object(Map::new()));
    if !slot.is_object() {
        *slot = Json::Object(Map::new());
    }
    match slot {
        Json::Object(m) => m,
        _ => unreachable!("slot was just replaced by a mapping"),
    }
}

/// Bring the internal and legacy provenance keys of a function's output back
/// into agreement. When the internal keys still name a location present in
/// the input (or are absent) but the legacy keys differ, the function moved
/// the resource through the legacy keys and those win. Otherwise the
/// internal keys win.
pub fn reconcile_provenance(input: &[Resource], output: &mut [Resource]) {
    let before: HashSet<_> = input.iter().map(|r| r.provenance(PATH_ANNOTATION, INDEX_ANNOTATION)).collect();
    for r in output.iter_mut() {
        let internal = r.provenance(PATH_ANNOTATION, INDEX_ANNOTATION);
        let legacy = r.provenance(LEGACY_PATH_ANNOTATION, LEGACY_INDEX_ANNOTATION);
        if internal == legacy {
            continue;
        }
        let untouched = internal == (None, None) || before.contains(&internal);
        if untouched && legacy.0.is_some() {
            r.put_provenance(PATH_ANNOTATION, INDEX_ANNOTATION, legacy);
        } else if internal.0.is_some() {
            r.put_provenance(LEGACY_PATH_ANNOTATION, LEGACY_INDEX_ANNOTATION, internal);
        }
    }
}

/// Parse a multi-document YAML stream. Empty documents are skipped.
pub fn parse_documents(src: &str) -> Result<Vec<Resource>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(src).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document {}", i))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).with_context(|| format!("converting YAML document {} to JSON", i))?;
        out.push(Resource::from_value(json).with_context(|| format!("YAML document {}", i))?);
    }
    Ok(out)
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}
