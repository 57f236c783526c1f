//! Built-in pipeline steps that run in-process instead of as functions.

#![forbid(unsafe_code)]

pub mod pkg_context;

pub use pkg_context::{dummy_pkg_context, generate as generate_pkg_context, is_pkg_context, PkgContextOutput, PKG_CONTEXT_FILE, PKG_CONTEXT_NAME};
