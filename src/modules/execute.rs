//! Closure-backed modules.

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::module::{Module, ModuleError, ModuleResult};
use rayon::prelude::*;

type BatchFn = dyn Fn(Vec<Document>, &ExecutionContext<'_>) -> ModuleResult + Send + Sync;
type DocumentFn = dyn Fn(Document, &ExecutionContext<'_>) -> ModuleResult + Send + Sync;

enum Action {
    Batch(Box<BatchFn>),
    PerDocument { f: Box<DocumentFn>, parallel: bool },
}

/// Runs a closure as a module step.
///
/// [`Execute::new`] hands the closure the whole input list.
/// [`Execute::for_each`] calls it once per document and concatenates the
/// returned lists in input order; [`Execute::parallel`] spreads those calls
/// over rayon workers without changing the output order.
///
/// A per-document failure is tagged with that document's source.
pub struct Execute {
    name: String,
    action: Action,
}

impl Execute {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Document>, &ExecutionContext<'_>) -> ModuleResult + Send + Sync + 'static,
    {
        Self {
            name: "Execute".to_string(),
            action: Action::Batch(Box::new(f)),
        }
    }

    pub fn for_each<F>(f: F) -> Self
    where
        F: Fn(Document, &ExecutionContext<'_>) -> ModuleResult + Send + Sync + 'static,
    {
        Self {
            name: "Execute".to_string(),
            action: Action::PerDocument {
                f: Box::new(f),
                parallel: false,
            },
        }
    }

    /// Process documents concurrently. Only affects [`Execute::for_each`].
    pub fn parallel(mut self) -> Self {
        if let Action::PerDocument { parallel, .. } = &mut self.action {
            *parallel = true;
        }
        self
    }

    /// Name shown in logs and errors.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn run_one(f: &DocumentFn, document: Document, context: &ExecutionContext<'_>) -> ModuleResult {
    let handle = document.clone();
    f(document, context).map_err(|err| ModuleError::for_document(&handle, err))
}

impl Module for Execute {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        match &self.action {
            Action::Batch(f) => f(inputs, context),
            Action::PerDocument { f, parallel: false } => {
                let mut outputs = Vec::with_capacity(inputs.len());
                for document in inputs {
                    outputs.extend(run_one(f.as_ref(), document, context)?);
                }
                Ok(outputs)
            }
            Action::PerDocument { f, parallel: true } => {
                let batches: Vec<Vec<Document>> = inputs
                    .into_par_iter()
                    .map(|document| run_one(f.as_ref(), document, context))
                    .collect::<Result<_, _>>()?;
                Ok(batches.into_iter().flatten().collect())
            }
        }
    }
}
