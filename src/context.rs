//! The per-invocation facade handed to every module.
//!
//! An [`ExecutionContext`] is created by the pipeline loop for each module
//! step and lives only for that call. Through it a module can:
//!
//! - create documents (the only way to start a new document lineage), with
//!   the engine's global metadata layered underneath,
//! - run a list of child modules against a document subset exactly the way
//!   the pipeline runs its own modules ([`ExecutionContext::execute`]),
//! - reach its cache namespace and the results of earlier pipelines,
//! - observe cancellation.
//!
//! Engine-wide state arrives through [`RunScope`], a bundle of shared
//! borrows owned by the engine for the duration of one run. Nothing here is
//! ambient or static.

use crate::cache::{CacheRegistry, ExecutionCache};
use crate::document::{Content, Document};
use crate::engine::DocumentCollection;
use crate::error::ExecutionError;
use crate::metadata::{MetaValue, Metadata, MetadataError};
use crate::module::{Module, ModuleError, ModuleId};
use crate::pipeline;
use std::sync::Arc;

/// Cooperative cancellation, checked before every module step.
///
/// Clones share state. A cancelled token stays cancelled; the engine hands
/// out a fresh one through [`Engine::reset_cancellation`](crate::engine::Engine::reset_cancellation).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl From<tokio_util::sync::CancellationToken> for CancellationToken {
    fn from(inner: tokio_util::sync::CancellationToken) -> Self {
        Self { inner }
    }
}

/// Engine state shared by every module invocation during one run.
#[derive(Clone, Copy)]
pub struct RunScope<'a> {
    pub(crate) global_metadata: &'a Metadata,
    pub(crate) documents: &'a DocumentCollection,
    pub(crate) caches: &'a CacheRegistry,
    pub(crate) cancellation: &'a CancellationToken,
}

pub struct ExecutionContext<'a> {
    scope: RunScope<'a>,
    pipeline: &'a str,
    module: &'a dyn Module,
    module_id: ModuleId,
    cache: Arc<dyn ExecutionCache>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        scope: RunScope<'a>,
        pipeline: &'a str,
        module: &'a dyn Module,
        module_id: ModuleId,
        cache: Arc<dyn ExecutionCache>,
    ) -> Self {
        Self {
            scope,
            pipeline,
            module,
            module_id,
            cache,
        }
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// The engine's global metadata, read-only for the whole run.
    pub fn global_metadata(&self) -> &Metadata {
        self.scope.global_metadata
    }

    /// Results of pipelines that already completed.
    pub fn documents(&self) -> &DocumentCollection {
        self.scope.documents
    }

    /// This module's cache namespace.
    pub fn cache(&self) -> &dyn ExecutionCache {
        self.cache.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.cancellation.is_cancelled()
    }

    // =========================================================================
    // Document factory
    // =========================================================================

    /// Start a new document lineage on top of the global metadata.
    pub fn new_document<I, K>(
        &self,
        source: Option<&str>,
        content: Content,
        items: I,
    ) -> Result<Document, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        let metadata = self.scope.global_metadata.clone_with(items)?;
        Ok(Document::new(source.map(String::from), metadata, content))
    }

    pub fn document_from_text<I, K>(
        &self,
        source: Option<&str>,
        text: impl Into<String>,
        items: I,
    ) -> Result<Document, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.new_document(source, Content::text(text), items)
    }

    /// The document takes ownership of `stream` and closes it once released.
    pub fn document_from_stream<I, K>(
        &self,
        source: Option<&str>,
        stream: impl crate::document::ContentStream + 'static,
        items: I,
    ) -> Result<Document, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.new_document(source, Content::stream(stream), items)
    }

    /// A content-less document carrying only metadata.
    pub fn empty_document<I, K>(&self, items: I) -> Result<Document, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.new_document(None, Content::Empty, items)
    }

    // =========================================================================
    // Nested execution
    // =========================================================================

    /// Run `modules` against `inputs` with the same semantics as a pipeline.
    ///
    /// Child modules share this module's cache namespace.
    pub fn execute(
        &self,
        modules: &[Arc<dyn Module>],
        inputs: Vec<Document>,
    ) -> Result<Vec<Document>, ExecutionError> {
        pipeline::run_modules(
            self.scope,
            self.pipeline,
            modules
                .iter()
                .map(|module| (module.as_ref(), self.module_id, self.cache.clone())),
            inputs,
        )
    }

    /// Run `modules` seeded with one empty document carrying `items`.
    ///
    /// A bad seed item is reported as this module's own failure.
    pub fn execute_with_metadata<I, K>(
        &self,
        modules: &[Arc<dyn Module>],
        items: I,
    ) -> Result<Vec<Document>, ModuleError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        let seed = self.empty_document(items)?;
        Ok(self.execute(modules, vec![seed])?)
    }
}
