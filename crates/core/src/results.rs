//! Structured results emitted by functions and the per-package ledger.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub const RESULT_LIST_API_VERSION: &str = "kpt.dev/v1";
pub const RESULT_LIST_KIND: &str = "FunctionResultList";
pub const RESULT_LIST_NAME: &str = "fnresults";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(alias = "")]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_value: Option<Json>,
}

/// One diagnostic emitted by a function. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

impl ResultItem {
    pub fn info(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Error, ..Default::default() }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file = Some(FileRef { path: path.into(), index: 0 });
        self
    }
}

/// `[SEVERITY] message in object a/v/Kind/ns/name in file "f" in field "p"`
impl fmt::Display for ResultItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity.as_str().to_uppercase(), self.message)?;
        if let Some(r) = self.resource_ref.as_ref().filter(|r| !r.kind.is_empty()) {
            f.write_str(" in object ")?;
            if !r.api_version.is_empty() {
                write!(f, "{}/", r.api_version)?;
            }
            write!(f, "{}/", r.kind)?;
            if !r.namespace.is_empty() {
                write!(f, "{}/", r.namespace)?;
            }
            f.write_str(&r.name)?;
        }
        if let Some(file) = self.file.as_ref().filter(|x| !x.path.is_empty()) {
            write!(f, " in file {:?}", file.path)?;
        }
        if let Some(field) = self.field.as_ref().filter(|x| !x.path.is_empty()) {
            write!(f, " in field {:?}", field.path)?;
        }
        Ok(())
    }
}

/// Ledger entry for one function invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FnResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, rename = "exec", skip_serializing_if = "String::is_empty")]
    pub exec_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultItem>,
}

impl FnResult {
    /// Image reference, or the exec path for local functions.
    pub fn name(&self) -> &str {
        if self.image.is_empty() { &self.exec_path } else { &self.image }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultListMeta {
    pub name: String,
}

/// Package-scoped, append-only ledger of function results.
///
/// `exitCode` is written for readers of `results.yaml` but never trusted on
/// the way back in: it is recomputed from the entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ResultListDoc")]
pub struct ResultList {
    api_version: String,
    kind: String,
    metadata: ResultListMeta,
    exit_code: i32,
    items: Vec<FnResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultListDoc {
    api_version: String,
    kind: String,
    metadata: ResultListMeta,
    #[serde(default)]
    items: Vec<FnResult>,
}

impl From<ResultListDoc> for ResultList {
    fn from(doc: ResultListDoc) -> Self {
        let mut list = ResultList { api_version: doc.api_version, kind: doc.kind, metadata: doc.metadata, ..Default::default() };
        for item in doc.items {
            list.push(item);
        }
        list
    }
}

impl Default for ResultList {
    fn default() -> Self {
        Self {
            api_version: RESULT_LIST_API_VERSION.to_string(),
            kind: RESULT_LIST_KIND.to_string(),
            metadata: ResultListMeta { name: RESULT_LIST_NAME.to_string() },
            exit_code: 0,
            items: Vec::new(),
        }
    }
}

impl ResultList {
    pub fn new() -> Self { Self::default() }

    /// Append an entry. The aggregate exit code turns 1 once any entry failed.
    pub fn push(&mut self, item: FnResult) {
        self.items.push(item);
        self.exit_code = self.exit_code();
    }

    /// Append every entry of another ledger, in order.
    pub fn extend(&mut self, other: ResultList) {
        for item in other.items {
            self.push(item);
        }
    }

    pub fn items(&self) -> &[FnResult] { &self.items }
    /// 1 if any entry exited non-zero, else 0.
    pub fn exit_code(&self) -> i32 {
        self.items.iter().any(|i| i.exit_code != 0) as i32
    }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn is_zero(n: &usize) -> bool { *n == 0 }
