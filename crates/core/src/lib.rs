//! kpipe core types: the resource collection handed to functions, the
//! structured results they emit, and the error value every layer wraps.

#![forbid(unsafe_code)]

pub mod error;
pub mod resource;
pub mod results;

pub use error::{BoxError, Cause, Class, Error, ErrorBuilder, ExecError, FnId, Op, PkgPath, ResultParseError};
pub use resource::{parse_documents, reconcile_provenance, FileAnnotations, Gvk, Resource};
pub use results::{FieldRef, FileRef, FnResult, ResourceRef, ResultItem, ResultList, Severity};

pub mod prelude {
    pub use super::{
        Class, Error, ExecError, FnId, FnResult, Gvk, Op, PkgPath, Resource, ResultItem, ResultList, Severity,
    };
}
