//! Function declarations as they appear in a Kptfile pipeline.

use std::collections::BTreeMap;

use kpipe_core::{Class, Error, FnId, Op};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

const VALIDATE: Op = Op("fn.validate");

/// A function plus the configuration it should receive.
///
/// Exactly one of `image` / `exec` names the function. At most one of
/// `config_path`, `config`, `config_map` supplies its configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Json>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map: BTreeMap<String, String>,
}

impl Function {
    pub fn image(image: impl Into<String>) -> Self {
        Self { image: Some(image.into()), ..Default::default() }
    }

    pub fn exec(path: impl Into<String>) -> Self {
        Self { exec: Some(path.into()), ..Default::default() }
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image.as_deref().filter(|s| !s.is_empty())
    }

    pub fn exec_path(&self) -> Option<&str> {
        self.exec.as_deref().filter(|s| !s.is_empty())
    }

    pub fn config_file(&self) -> Option<&str> {
        self.config_path.as_deref().filter(|s| !s.is_empty())
    }

    pub fn inline_config(&self) -> Option<&Json> {
        self.config.as_ref().filter(|v| !v.is_null())
    }

    /// Image reference, falling back to the exec path.
    pub fn id(&self) -> FnId {
        FnId::new(self.image_ref().or(self.exec_path()).unwrap_or(""))
    }

    /// Reject declarations that name zero or two functions, or that carry
    /// more than one configuration source.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Error::builder().op(VALIDATE).func(self.id()).class(Class::InvalidParam).msg(msg).build();
        match (self.image_ref(), self.exec_path()) {
            (Some(_), Some(_)) => return Err(invalid("must not specify both `image` and `exec`")),
            (None, None) => return Err(invalid("must specify one of `image` or `exec`")),
            _ => {}
        }
        let sources = [self.config_file().is_some(), self.inline_config().is_some(), !self.config_map.is_empty()];
        if sources.iter().filter(|set| **set).count() > 1 {
            return Err(invalid("functionConfig must not specify more than one of `configPath`, `config` and `configMap`"));
        }
        Ok(())
    }
}
