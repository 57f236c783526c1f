//! kpipe rendering: reads packages, runs their Kptfile pipelines and writes
//! the hydrated result back.

#![forbid(unsafe_code)]

pub mod eval;
pub mod hydrate;
pub mod kptfile;
pub mod pkg;
pub mod render;
pub mod results;

pub use hydrate::{discover_packages, PackageOutput};
pub use kptfile::{Kptfile, Pipeline, KPTFILE_NAME};
pub use pkg::{read_package, read_tree, write_package, PackageFiles};
pub use render::{RenderOutput, Renderer};
pub use results::{write_results, RESULTS_FILE};
