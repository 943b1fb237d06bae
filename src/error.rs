//! Execution and engine errors.
//!
//! Concern-local errors live next to their code ([`MetadataError`],
//! [`DocumentError`](crate::document::DocumentError),
//! [`ModuleError`](crate::module::ModuleError),
//! [`ConfigError`](crate::config::ConfigError)); this module holds the two
//! that cross module boundaries.

use crate::config::ConfigError;
use crate::metadata::MetadataError;
use crate::module::ModuleError;
use thiserror::Error;

/// A failure while threading documents through a module list.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A module's `execute` returned an error. The pipeline is aborted.
    #[error("module {module} (step {step}) in pipeline {pipeline} failed: {source}")]
    Module {
        pipeline: String,
        module: String,
        step: usize,
        #[source]
        source: ModuleError,
    },
    #[error("execution of pipeline {pipeline} was cancelled")]
    Cancelled { pipeline: String },
}

impl ExecutionError {
    pub fn pipeline(&self) -> &str {
        match self {
            ExecutionError::Module { pipeline, .. } | ExecutionError::Cancelled { pipeline } => {
                pipeline
            }
        }
    }

    /// Name of the outermost failing module, if a module failed.
    pub fn module(&self) -> Option<&str> {
        match self {
            ExecutionError::Module { module, .. } => Some(module),
            ExecutionError::Cancelled { .. } => None,
        }
    }

    /// Source identifier of the failing document, searching through nested
    /// combinator failures.
    pub fn document_source(&self) -> Option<&str> {
        match self {
            ExecutionError::Module { source, .. } => module_error_source(source),
            ExecutionError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ExecutionError::Cancelled { .. } => true,
            ExecutionError::Module { source, .. } => match source {
                ModuleError::Execution(inner) => inner.is_cancelled(),
                _ => false,
            },
        }
    }
}

fn module_error_source(error: &ModuleError) -> Option<&str> {
    match error {
        ModuleError::InDocument { source_id, .. } => Some(source_id),
        ModuleError::Execution(inner) => inner.document_source(),
        _ => None,
    }
}

/// Errors surfaced by [`Engine`](crate::engine::Engine).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline name must not be empty")]
    InvalidPipelineName,
    #[error("a pipeline named {0:?} already exists")]
    DuplicatePipeline(String),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("{} pipelines failed: {}", .0.len(), summarize(.0))]
    Multiple(Vec<ExecutionError>),
}

impl EngineError {
    /// Every execution failure carried by this error.
    pub fn execution_errors(&self) -> Vec<&ExecutionError> {
        match self {
            EngineError::Execution(err) => vec![err],
            EngineError::Multiple(errs) => errs.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn summarize(errors: &[ExecutionError]) -> String {
    errors
        .iter()
        .map(|e| e.pipeline().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
