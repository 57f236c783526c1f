//! Environment-driven runtime options.

use crate::format::{Truncation, DEFAULT_TRUNCATE_LINES};

pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// docker-compatible CLI used for container functions.
    pub container_runtime: String,
    pub truncation: Truncation,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            container_runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
            truncation: Truncation::default(),
        }
    }
}

impl RuntimeOptions {
    /// Read `KPIPE_CONTAINER_RUNTIME`, `KPIPE_TRUNCATE_LINES` and
    /// `KPIPE_TRUNCATE_OUTPUT`, falling back to defaults.
    pub fn from_env() -> Self {
        let container_runtime = std::env::var("KPIPE_CONTAINER_RUNTIME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string());
        let max_lines = std::env::var("KPIPE_TRUNCATE_LINES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_TRUNCATE_LINES);
        let enabled = std::env::var("KPIPE_TRUNCATE_OUTPUT")
            .ok()
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
            .unwrap_or(true);
        Self { container_runtime, truncation: Truncation { enabled, max_lines } }
    }
}
