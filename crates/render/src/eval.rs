//! Running a single, ad-hoc function over a directory.

use std::path::Path;

use kpipe_core::{Error, Op, ResultList};
use kpipe_fnruntime::{Function, FunctionRunner, Reporter};
use tokio_util::sync::CancellationToken;

use crate::hydrate::PackageOutput;
use crate::pkg::read_tree;
use crate::render::Renderer;

const EVAL: Op = Op("fn.eval");

impl Renderer<'_> {
    /// Run `f` once over every resource under `dir`, nested packages
    /// included. No package context is generated.
    pub async fn eval(
        &self,
        dir: &Path,
        f: &Function,
        reporter: &mut dyn Reporter,
        cancel: &CancellationToken,
    ) -> PackageOutput {
        let mut results = ResultList::new();
        let wrap = |e: Error| Error::builder().op(EVAL).path(dir).wrap(e).build();

        let tree = match read_tree(dir) {
            Ok(t) => t,
            Err(e) => {
                let err = Error::builder().op(EVAL).path(dir).msg(format!("{:#}", e)).build();
                return PackageOutput { results, resources: Err(err), files: Default::default() };
            }
        };
        let runner = match f.validate().and_then(|_| {
            FunctionRunner::from_declaration(f, dir, self.factory(), self.truncation())
        }) {
            Ok(r) => r,
            Err(e) => return PackageOutput { results, resources: Err(wrap(e)), files: tree.files },
        };
        let resources = runner.run(&tree.resources, reporter, &mut results, cancel).await.map_err(wrap);
        PackageOutput { results, resources, files: tree.files }
    }
}
