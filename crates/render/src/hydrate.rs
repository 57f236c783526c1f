//! Rendering a package tree: subpackages first, each with its own ledger,
//! their output feeding the parent's input.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use kpipe_core::{Error, Op, Resource, ResultList};
use kpipe_fnruntime::Reporter;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kptfile::{is_package_dir, Kptfile};
use crate::pkg::read_package;
use crate::render::Renderer;

const HYDRATE: Op = Op("pkg.hydrate");

/// Outcome of running functions over a package tree.
#[derive(Debug)]
pub struct PackageOutput {
    /// Every package's ledger, concatenated in completion order.
    pub results: ResultList,
    /// Root package resources, subpackage resources included.
    pub resources: Result<Vec<Resource>, Error>,
    /// Files read across the tree, relative to the root.
    pub files: BTreeSet<String>,
}

/// Package directories below `root` (inclusive), children before parents,
/// siblings sorted by directory name. Paths are relative to `root`.
pub fn discover_packages(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut order = Vec::new();
    visit(root, "", &mut order)?;
    order.push(String::new());
    Ok(order)
}

fn visit(dir: &Path, rel: &str, order: &mut Vec<String>) -> anyhow::Result<()> {
    let mut subdirs: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    subdirs.sort();
    for name in subdirs {
        let rel_path = if rel.is_empty() { name.clone() } else { format!("{}/{}", rel, name) };
        let path = dir.join(&name);
        if is_package_dir(&path) {
            visit(&path, &rel_path, order)?;
            order.push(rel_path);
        } else {
            visit(&path, &rel_path, order)?;
        }
    }
    Ok(())
}

/// Nearest enclosing package of `rel` among `pkgs`, excluding `rel` itself.
fn parent_of<'p>(rel: &str, pkgs: &'p [String]) -> Option<&'p str> {
    let mut best: Option<&str> = None;
    for p in pkgs.iter().map(String::as_str).filter(|p| *p != rel) {
        let encloses = p.is_empty() || rel.starts_with(&format!("{}/", p));
        if encloses && best.map_or(true, |b| p.len() > b.len()) {
            best = Some(p);
        }
    }
    best
}

fn reroot(resources: Vec<Resource>, prefix: &str) -> Result<Vec<Resource>, Error> {
    resources
        .into_iter()
        .map(|mut r| {
            let a = r.file_annotations().map_err(|e| Error::builder().op(HYDRATE).msg(format!("{:#}", e)).build())?;
            let path = if a.path.is_empty() { String::new() } else { format!("{}/{}", prefix, a.path) };
            if !path.is_empty() {
                r.set_file_annotations(&path, a.index);
            }
            Ok(r)
        })
        .collect()
}

impl Renderer<'_> {
    /// Render the package at `root` and every subpackage beneath it.
    pub async fn hydrate(&self, root: &Path, reporter: &mut dyn Reporter, cancel: &CancellationToken) -> PackageOutput {
        let mut results = ResultList::new();
        let mut files = BTreeSet::new();
        let fail = |results, files, e: Error| PackageOutput {
            results,
            resources: Err(Error::builder().op(HYDRATE).path(root).wrap(e).build()),
            files,
        };

        let pkgs = match discover_packages(root) {
            Ok(p) => p,
            Err(e) => return fail(results, files, Error::builder().msg(format!("{:#}", e)).build()),
        };
        let mut outputs: HashMap<String, Vec<Resource>> = HashMap::new();

        for rel in &pkgs {
            let dir: PathBuf = if rel.is_empty() { root.to_path_buf() } else { root.join(rel) };
            let kptfile = match Kptfile::read(&dir) {
                Ok(k) => k,
                Err(e) => {
                    let err = Error::builder().path(&dir).msg(format!("{:#}", e)).build();
                    return fail(results, files, err);
                }
            };
            let own = match read_package(&dir) {
                Ok(p) => p,
                Err(e) => {
                    let err = Error::builder().path(&dir).msg(format!("{:#}", e)).build();
                    return fail(results, files, err);
                }
            };
            for f in own.files {
                files.insert(if rel.is_empty() { f } else { format!("{}/{}", rel, f) });
            }

            let mut input = own.resources;
            let children: Vec<&String> = pkgs.iter().filter(|p| parent_of(p, &pkgs) == Some(rel.as_str())).collect();
            for child in children {
                let prefix = if rel.is_empty() { child.clone() } else { child[rel.len() + 1..].to_string() };
                let out = outputs.remove(child.as_str()).unwrap_or_default();
                match reroot(out, &prefix) {
                    Ok(mut r) => input.append(&mut r),
                    Err(e) => return fail(results, files, e),
                }
            }

            let name = if rel.is_empty() { display_name(root) } else { rel.clone() };
            reporter.write_out(&format!("Package {:?}:\n", name));
            debug!(pkg = %name, resources = input.len(), "rendering package");
            let out = self.render(&dir, input, &kptfile.pipeline, reporter, cancel).await;
            results.extend(out.results);
            match out.resources {
                Ok(r) => {
                    reporter.write_out("\n");
                    outputs.insert(rel.clone(), r);
                }
                Err(e) => return fail(results, files, e),
            }
        }

        let resources = outputs.remove("").unwrap_or_default();
        PackageOutput { results, resources: Ok(resources), files }
    }
}

fn display_name(root: &Path) -> String {
    let abs = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    abs.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| ".".to_string())
}
