//! Reading a package directory into a resource collection and writing the
//! collection back.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

use anyhow::{anyhow, Context, Result};
use kpipe_core::{parse_documents, Resource};
use tracing::debug;

use crate::kptfile::{is_package_dir, KPTFILE_NAME};

/// Resources of one package plus the files they came from, relative to the
/// package root with `/` separators.
#[derive(Debug, Clone, Default)]
pub struct PackageFiles {
    pub resources: Vec<Resource>,
    pub files: BTreeSet<String>,
}

fn is_resource_file(name: &str) -> bool {
    name == KPTFILE_NAME || name.ends_with(".yaml") || name.ends_with(".yml")
}

/// Read every resource file of the package at `root`. Nested packages
/// (directories with their own Kptfile) and hidden directories are skipped.
pub fn read_package(root: &Path) -> Result<PackageFiles> {
    let mut out = PackageFiles::default();
    read_dir(root, "", false, &mut out)?;
    debug!(pkg = %root.display(), files = out.files.len(), resources = out.resources.len(), "read package");
    Ok(out)
}

/// Like [`read_package`] but descends into nested packages as well.
pub fn read_tree(root: &Path) -> Result<PackageFiles> {
    let mut out = PackageFiles::default();
    read_dir(root, "", true, &mut out)?;
    debug!(dir = %root.display(), files = out.files.len(), resources = out.resources.len(), "read tree");
    Ok(out)
}

fn read_dir(dir: &Path, rel: &str, nested: bool, out: &mut PackageFiles) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("listing {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let rel_path = if rel.is_empty() { name.clone() } else { format!("{}/{}", rel, name) };
        let ty = entry.file_type().with_context(|| format!("inspecting {}", path.display()))?;
        if ty.is_dir() {
            if name.starts_with('.') || (!nested && is_package_dir(&path)) {
                continue;
            }
            read_dir(&path, &rel_path, nested, out)?;
        } else if ty.is_file() && is_resource_file(&name) {
            let src = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let docs = parse_documents(&src).with_context(|| format!("parsing {}", path.display()))?;
            for (index, mut r) in docs.into_iter().enumerate() {
                r.set_file_annotations(&rel_path, index);
                out.resources.push(r);
            }
            out.files.insert(rel_path);
        }
    }
    Ok(())
}

/// File name for a resource that carries no path annotation.
fn default_path(r: &Resource) -> String {
    format!("{}_{}.yaml", r.kind().to_lowercase(), r.name()).replace('/', "_")
}

fn check_relative(p: &str) -> Result<()> {
    let ok = !p.is_empty()
        && Path::new(p).components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok { Ok(()) } else { Err(anyhow!("resource path {:?} escapes the package", p)) }
}

/// Write `resources` under `root`, one file per path annotation, documents
/// in collection order. Files listed in `previous` that no longer hold any
/// resource are removed. Provenance annotations are not written.
pub fn write_package(root: &Path, resources: &[Resource], previous: &BTreeSet<String>) -> Result<()> {
    let mut files: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    for r in resources {
        let path = r.file_annotations()?.path;
        let path = if path.is_empty() { default_path(r) } else { path };
        check_relative(&path)?;
        let mut r = r.clone();
        r.clear_file_annotations();
        files.entry(path).or_default().push(r);
    }

    for (rel, docs) in &files {
        let mut text = String::new();
        for (i, r) in docs.iter().enumerate() {
            if i > 0 {
                text.push_str("---\n");
            }
            text.push_str(&r.to_yaml()?);
        }
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    }

    for rel in previous.iter().filter(|p| !files.contains_key(*p)) {
        let path = root.join(rel);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(file = %rel, "removed file with no remaining resources"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(anyhow!(e).context(format!("removing {}", path.display()))),
        }
    }
    Ok(())
}
