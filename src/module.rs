//! The module contract.
//!
//! A module maps an ordered list of documents plus an
//! [`ExecutionContext`] to a new ordered list of documents. Input documents
//! are handed over by value: whatever a module does not return is dropped
//! (and any owned stream behind it released) when `execute` returns.
//!
//! Modules are shared as `Arc<dyn Module>` so that the same instance can sit
//! in a pipeline and be referenced from a combinator's child list. They must
//! be `Send + Sync`; a module may fan its per-document work out over rayon as
//! long as the returned list keeps the input order.

use crate::context::ExecutionContext;
use crate::document::{Document, DocumentError};
use crate::error::ExecutionError;
use crate::metadata::MetadataError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Result of a module step.
pub type ModuleResult = Result<Vec<Document>, ModuleError>;

/// An ordered list of shared modules.
pub type ModuleList = Vec<Arc<dyn Module>>;

/// Decides whether a document is selected.
pub type DocumentPredicate = Arc<dyn Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync>;

/// Decides once per execution, independent of any single document.
pub type ContextPredicate = Arc<dyn Fn(&ExecutionContext<'_>) -> bool + Send + Sync>;

/// Builds a [`ModuleList`] from module values.
///
/// ```rust
/// use folio::modules;
/// use folio::modules::{Take, Where};
///
/// let list = modules![Take::new(3), Where::new(|doc, _| doc.source().is_some())];
/// assert_eq!(list.len(), 2);
/// ```
#[macro_export]
macro_rules! modules {
    ($($module:expr),* $(,)?) => {
        vec![$(::std::sync::Arc::new($module) as ::std::sync::Arc<dyn $crate::module::Module>),*]
    };
}

pub trait Module: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult;
}

/// Identity of a registered module; keys its cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ModuleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Errors a module may raise from `execute`.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
    #[error("{0}")]
    Execution(Box<ExecutionError>),
    #[error("document {source_id}: {error}")]
    InDocument {
        source_id: String,
        #[source]
        error: Box<ModuleError>,
    },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ModuleError {
    pub fn msg(message: impl Into<String>) -> Self {
        ModuleError::Message(message.into())
    }

    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ModuleError::Other(Box::new(error))
    }

    /// Attach the document's source so batch failures are traceable.
    /// Documents without a source, and errors that already name one, are
    /// left unchanged.
    pub fn for_document(document: &Document, error: impl Into<ModuleError>) -> Self {
        let error = error.into();
        if error.source_id().is_some() {
            return error;
        }
        match document.source() {
            Some(source) => ModuleError::InDocument {
                source_id: source.to_string(),
                error: Box::new(error),
            },
            None => error,
        }
    }

    /// The document source attached to this error, if any.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            ModuleError::InDocument { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}

impl From<ExecutionError> for ModuleError {
    fn from(error: ExecutionError) -> Self {
        ModuleError::Execution(Box::new(error))
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(error: std::io::Error) -> Self {
        ModuleError::Document(DocumentError::Io(error))
    }
}
