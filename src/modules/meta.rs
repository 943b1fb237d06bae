//! Modules that clone every input with something added or replaced.

use crate::context::ExecutionContext;
use crate::document::{Content, Document};
use crate::metadata::{MetaValue, Metadata, MetadataError};
use crate::module::{Module, ModuleError, ModuleResult};
use serde_json::Value;
use std::sync::Arc;

type ValueFn = dyn Fn(&Document, &ExecutionContext<'_>) -> Result<Value, ModuleError> + Send + Sync;
type TextFn = dyn Fn(&Document, &ExecutionContext<'_>) -> Result<String, ModuleError> + Send + Sync;

enum MetaSource {
    Fixed(MetaValue),
    PerDocument(Arc<ValueFn>),
}

/// Adds one metadata entry to every input document.
///
/// [`Meta::new`] adds a literal, [`Meta::computed`] a value recomputed on
/// every read of the resulting documents, and [`Meta::for_each`] a literal
/// computed once per document while the module runs.
pub struct Meta {
    key: String,
    source: MetaSource,
}

impl Meta {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            source: MetaSource::Fixed(MetaValue::literal(value)),
        }
    }

    pub fn computed<F>(key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &Metadata) -> Result<Value, MetadataError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            source: MetaSource::Fixed(MetaValue::computed(f)),
        }
    }

    pub fn for_each<F>(key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> Result<Value, ModuleError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            source: MetaSource::PerDocument(Arc::new(f)),
        }
    }

    fn value_for(&self, doc: &Document, context: &ExecutionContext<'_>) -> Result<MetaValue, ModuleError> {
        match &self.source {
            MetaSource::Fixed(value) => Ok(value.clone()),
            MetaSource::PerDocument(f) => f(doc, context).map(MetaValue::Literal),
        }
    }
}

impl Module for Meta {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        inputs
            .iter()
            .map(|doc| {
                self.value_for(doc, context)
                    .and_then(|value| Ok(doc.clone_with_items([(self.key.as_str(), value)])?))
                    .map_err(|err| ModuleError::for_document(doc, err))
            })
            .collect()
    }
}

enum TextSource {
    Fixed(Arc<str>),
    PerDocument(Box<TextFn>),
}

/// Replaces the content of every input document with text.
///
/// Metadata and lineage are kept; only the content changes.
pub struct ReplaceContent {
    source: TextSource,
}

impl ReplaceContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            source: TextSource::Fixed(Arc::from(text.into())),
        }
    }

    pub fn for_each<F>(f: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> Result<String, ModuleError> + Send + Sync + 'static,
    {
        Self {
            source: TextSource::PerDocument(Box::new(f)),
        }
    }
}

impl Module for ReplaceContent {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        inputs
            .iter()
            .map(|doc| {
                let content = match &self.source {
                    TextSource::Fixed(text) => Content::Text(text.clone()),
                    TextSource::PerDocument(f) => Content::text(
                        f(doc, context).map_err(|err| ModuleError::for_document(doc, err))?,
                    ),
                };
                Ok(doc.clone_with_content(content)?)
            })
            .collect()
    }
}
