//! ResourceList wire format exchanged with function processes.

use anyhow::{anyhow, Context, Result};
use kpipe_core::{parse_documents, Resource, ResultItem};
use serde::Serialize;
use serde_json::Value as Json;

pub const RESOURCE_LIST_API_VERSION: &str = "config.kubernetes.io/v1";
pub const RESOURCE_LIST_KIND: &str = "ResourceList";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceListOut<'a> {
    api_version: &'static str,
    kind: &'static str,
    items: &'a [Resource],
    #[serde(skip_serializing_if = "Option::is_none")]
    function_config: Option<&'a Resource>,
}

/// Serialize the function input document.
pub fn encode_input(items: &[Resource], config: Option<&Resource>) -> Result<String> {
    let rl = ResourceListOut {
        api_version: RESOURCE_LIST_API_VERSION,
        kind: RESOURCE_LIST_KIND,
        items,
        function_config: config,
    };
    serde_yaml::to_string(&rl).context("encoding ResourceList")
}

/// What a function wrote on its output stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub items: Vec<Resource>,
    /// Raw `results` document, left unparsed.
    pub results: Option<Json>,
}

/// Decode a function's output. A single `ResourceList` document is
/// unwrapped; any other stream is taken as a plain list of resources.
pub fn decode_output(raw: &[u8]) -> Result<Decoded> {
    let text = std::str::from_utf8(raw).context("function output is not UTF-8")?;
    let docs = parse_documents(text).context("parsing function output")?;
    match docs.as_slice() {
        [only] if only.kind() == RESOURCE_LIST_KIND => {
            let v = only.as_value();
            let items = match v.get("items") {
                None | Some(Json::Null) => Vec::new(),
                Some(Json::Array(arr)) => arr
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Resource::from_value(item.clone()).with_context(|| format!("ResourceList item {}", i)))
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(anyhow!("ResourceList items must be a sequence")),
            };
            let results = v.get("results").filter(|r| !r.is_null()).cloned();
            Ok(Decoded { items, results })
        }
        _ => Ok(Decoded { items: docs, results: None }),
    }
}

fn is_nil_or_empty(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Array(a) => a.is_empty(),
        Json::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Parse a raw results document into result items.
///
/// Two shapes are accepted: a bare sequence of items, or a mapping whose
/// non-empty `items` field holds the sequence.
pub fn parse_results(raw: Option<&Json>) -> Result<Vec<ResultItem>, serde_json::Error> {
    let Some(raw) = raw.filter(|v| !is_nil_or_empty(v)) else { return Ok(Vec::new()) };
    let list = match raw.get("items") {
        Some(items) if raw.is_object() && !is_nil_or_empty(items) => items,
        _ => raw,
    };
    serde_json::from_value(list.clone())
}
