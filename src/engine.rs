//! Run orchestration.
//!
//! The [`Engine`] owns everything that outlives a single module call: the
//! registered pipelines, the global metadata, the per-module caches, and the
//! stored result of every pipeline ([`DocumentCollection`]).
//!
//! # One run
//!
//! ```text
//! drop caches of modules no longer registered
//! reset_entry_hits()                       every cache namespace
//! for pipeline in registration order:
//!     process-once and already completed?  → reuse stored result
//!     seed = [empty document over global metadata]
//!     result = pipeline.execute(seed)      → stored under pipeline name
//! clear_unhit_entries()                    only if every pipeline succeeded
//! ```
//!
//! Pipelines run one at a time; a later pipeline may read an earlier one's
//! result through [`ExecutionContext::documents`]. Modules that fan out
//! over rayon run on the engine's pool, sized by `[processing]
//! max_processes`.
//!
//! # Failure policy
//!
//! By default the first failing pipeline aborts the run and its
//! [`ExecutionError`] is returned. With `[execution] continue_on_error` the
//! remaining pipelines still run and every failure comes back together as
//! [`EngineError::Multiple`]. Cancellation always aborts. Either way a
//! failed run leaves the caches unswept, so entries the run never reached
//! survive for the next attempt.
//!
//! [`ExecutionContext::documents`]: crate::context::ExecutionContext::documents

use crate::cache::{CacheRegistry, CacheStats};
use crate::config::{EngineSettings, effective_threads};
use crate::context::{CancellationToken, RunScope};
use crate::document::{Content, Document};
use crate::error::{EngineError, ExecutionError};
use crate::metadata::{MetaValue, Metadata};
use crate::module::{ModuleId, ModuleList};
use crate::pipeline::{Pipeline, PipelineCollection, fold_name};
use crate::report::{PipelineOutcome, PipelineReport, RunReport};
use std::collections::HashSet;
use std::time::Instant;

// =============================================================================
// Stored results
// =============================================================================

#[derive(Debug)]
struct StoredResult {
    name: String,
    documents: Option<Vec<Document>>,
}

/// The stored result of each registered pipeline, in registration order.
///
/// A pipeline that has not completed in the current run (or, for
/// process-once pipelines, in any run) reads as an empty list.
#[derive(Debug, Default)]
pub struct DocumentCollection {
    results: Vec<StoredResult>,
}

impl DocumentCollection {
    fn find(&self, name: &str) -> Option<&StoredResult> {
        let folded = fold_name(name);
        self.results.iter().find(|r| fold_name(&r.name) == folded)
    }

    /// Documents produced by `name`. `None` if no such pipeline is
    /// registered.
    pub fn get(&self, name: &str) -> Option<&[Document]> {
        self.find(name)
            .map(|r| r.documents.as_deref().unwrap_or_default())
    }

    /// Whether a pipeline called `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Whether `name` has a stored result.
    pub fn is_complete(&self, name: &str) -> bool {
        self.find(name).is_some_and(|r| r.documents.is_some())
    }

    /// Completed pipelines and their documents, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.results
            .iter()
            .filter_map(|r| r.documents.as_deref().map(|d| (r.name.as_str(), d)))
    }

    /// Every stored document, pipeline by pipeline in registration order.
    pub fn all(&self) -> impl Iterator<Item = &Document> {
        self.iter().flat_map(|(_, docs)| docs.iter())
    }

    pub fn len(&self) -> usize {
        self.all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.all().next().is_none()
    }

    /// Start a run: one slot per registered pipeline, keeping completed
    /// results only for process-once pipelines.
    pub(crate) fn prepare(&mut self, pipelines: &PipelineCollection) {
        let mut previous = std::mem::take(&mut self.results);
        self.results = pipelines
            .iter()
            .map(|p| {
                let folded = fold_name(p.name());
                let kept = if p.process_documents_once() {
                    previous
                        .iter_mut()
                        .find(|r| fold_name(&r.name) == folded)
                        .and_then(|r| r.documents.take())
                } else {
                    None
                };
                StoredResult {
                    name: p.name().to_string(),
                    documents: kept,
                }
            })
            .collect();
    }

    pub(crate) fn store(&mut self, name: &str, documents: Vec<Document>) {
        let folded = fold_name(name);
        match self.results.iter_mut().find(|r| fold_name(&r.name) == folded) {
            Some(slot) => slot.documents = Some(documents),
            None => self.results.push(StoredResult {
                name: name.to_string(),
                documents: Some(documents),
            }),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    settings: EngineSettings,
    global_metadata: Metadata,
    pipelines: PipelineCollection,
    documents: DocumentCollection,
    caches: CacheRegistry,
    cancellation: CancellationToken,
    pool: Option<rayon::ThreadPool>,
}

impl Engine {
    /// An engine with stock settings: caching on, abort on first failure,
    /// the global rayon pool, no global metadata.
    pub fn new() -> Self {
        let settings = EngineSettings::default();
        Self {
            caches: CacheRegistry::new(settings.cache.enabled),
            settings,
            global_metadata: Metadata::new(),
            pipelines: PipelineCollection::new(),
            documents: DocumentCollection::default(),
            cancellation: CancellationToken::new(),
            pool: None,
        }
    }

    /// An engine configured from loaded settings.
    ///
    /// `[metadata]` seeds the global metadata. A dedicated thread pool is
    /// built only when `max_processes` is set.
    pub fn from_settings(settings: EngineSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        let global_metadata = settings.global_metadata()?;
        let pool = match settings.processing.max_processes {
            Some(_) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(effective_threads(&settings.processing))
                    .thread_name(|i| format!("folio-worker-{i}"))
                    .build()?,
            ),
            None => None,
        };
        Ok(Self {
            caches: CacheRegistry::new(settings.cache.enabled),
            settings,
            global_metadata,
            pipelines: PipelineCollection::new(),
            documents: DocumentCollection::default(),
            cancellation: CancellationToken::new(),
            pool,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn global_metadata(&self) -> &Metadata {
        &self.global_metadata
    }

    /// Replace the global metadata with a single layer of `items`.
    pub fn set_global_metadata<I, K>(&mut self, items: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.global_metadata = Metadata::from_items(items)?;
        Ok(())
    }

    /// Push `items` as a new layer over the current global metadata.
    pub fn add_global_metadata<I, K>(&mut self, items: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.global_metadata = self.global_metadata.clone_with(items)?;
        Ok(())
    }

    pub fn pipelines(&self) -> &PipelineCollection {
        &self.pipelines
    }

    pub fn pipelines_mut(&mut self) -> &mut PipelineCollection {
        &mut self.pipelines
    }

    /// Register a pipeline; see [`PipelineCollection::add`].
    pub fn add_pipeline(
        &mut self,
        name: Option<&str>,
        modules: ModuleList,
    ) -> Result<&mut Pipeline, EngineError> {
        self.pipelines.add(name, modules)
    }

    /// Results of the latest run.
    pub fn documents(&self) -> &DocumentCollection {
        &self.documents
    }

    /// A handle that cancels the current or next run. It stays cancelled
    /// until [`Engine::reset_cancellation`] replaces it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Replace the cancellation token with a fresh one and return it.
    /// Handles to the old token no longer affect this engine.
    pub fn reset_cancellation(&mut self) -> CancellationToken {
        self.cancellation = CancellationToken::new();
        self.cancellation.clone()
    }

    /// Use an externally owned token, e.g. a child of a server-wide one.
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    /// Run every pipeline in registration order.
    pub fn execute(&mut self) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let continue_on_error = self.settings.execution.continue_on_error;
        tracing::info!(pipelines = self.pipelines.len(), "engine run starting");

        let live: HashSet<ModuleId> = self
            .pipelines
            .iter()
            .flat_map(|p| p.module_ids())
            .collect();
        self.caches.retain_modules(|id| live.contains(&id));
        self.caches.reset_entry_hits();
        self.documents.prepare(&self.pipelines);

        let mut report = RunReport::default();
        let mut failures: Vec<ExecutionError> = Vec::new();

        for pipeline in self.pipelines.iter() {
            let name = pipeline.name();

            if pipeline.process_documents_once() && self.documents.is_complete(name) {
                let documents = self.documents.get(name).map_or(0, <[Document]>::len);
                tracing::info!(pipeline = %name, documents, "reusing process-once result");
                report.pipelines.push(PipelineReport {
                    name: name.to_string(),
                    outcome: PipelineOutcome::Reused,
                    documents,
                    elapsed: std::time::Duration::ZERO,
                });
                continue;
            }

            if self.cancellation.is_cancelled() {
                tracing::info!(pipeline = %name, "engine run cancelled");
                return Err(ExecutionError::Cancelled {
                    pipeline: name.to_string(),
                }
                .into());
            }

            let pipeline_started = Instant::now();
            let seed = Document::new(None, self.global_metadata.clone(), Content::Empty);
            let scope = RunScope {
                global_metadata: &self.global_metadata,
                documents: &self.documents,
                caches: &self.caches,
                cancellation: &self.cancellation,
            };
            let result = match &self.pool {
                Some(pool) => pool.install(|| pipeline.execute(scope, vec![seed])),
                None => pipeline.execute(scope, vec![seed]),
            };

            match result {
                Ok(documents) => {
                    let elapsed = pipeline_started.elapsed();
                    tracing::info!(
                        pipeline = %name,
                        documents = documents.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "pipeline complete"
                    );
                    report.pipelines.push(PipelineReport {
                        name: name.to_string(),
                        outcome: PipelineOutcome::Executed,
                        documents: documents.len(),
                        elapsed,
                    });
                    self.documents.store(name, documents);
                }
                Err(err) if err.is_cancelled() || !continue_on_error => {
                    tracing::info!(pipeline = %name, error = %err, "engine run aborted");
                    return Err(err.into());
                }
                Err(err) => {
                    tracing::warn!(pipeline = %name, error = %err, "pipeline failed, continuing");
                    failures.push(err);
                }
            }
        }

        if !failures.is_empty() {
            return Err(EngineError::Multiple(failures));
        }

        report.cache = self.caches.stats();
        report.evicted = self.caches.clear_unhit_entries();
        report.elapsed = started.elapsed();
        tracing::debug!(evicted = report.evicted, cache = %report.cache, "cache sweep");
        tracing::info!(
            executed = report.executed(),
            reused = report.reused(),
            documents = report.total_documents(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "engine run complete"
        );
        Ok(report)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pipelines", &self.pipelines)
            .field("global_metadata", &self.global_metadata)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
