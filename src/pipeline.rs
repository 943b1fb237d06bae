//! Pipelines and the document-threading loop.
//!
//! A [`Pipeline`] is a named, ordered module list. Running it is a fold over
//! the modules:
//!
//! ```text
//! current = initial documents
//! for each module:
//!     current = module.execute(current, context)   // fully materialized
//! result  = current
//! ```
//!
//! Each module runs to completion before the next starts; there is no lazy
//! propagation between steps. Documents a step does not pass on are dropped
//! as soon as that step returns, so owned streams behind intermediate
//! documents are released during the run rather than at its end.
//!
//! The same loop ([`run_modules`]) backs
//! [`ExecutionContext::execute`](crate::context::ExecutionContext::execute),
//! so a combinator's child modules behave exactly like top-level ones.
//!
//! # Registration
//!
//! [`PipelineCollection`] keeps pipelines in registration order, which is
//! also execution order. Names are case-insensitive and unique; an omitted
//! name becomes `Pipeline N` where `N` is the new pipeline's position.

use crate::cache::ExecutionCache;
use crate::context::{ExecutionContext, RunScope};
use crate::document::Document;
use crate::error::{EngineError, ExecutionError};
use crate::module::{Module, ModuleId, ModuleList};
use std::sync::Arc;
use std::time::Instant;

pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Thread `inputs` through `modules` in order.
///
/// Cancellation is checked before every step. A failing module aborts the
/// loop; the documents it was given have already been dropped with it.
pub(crate) fn run_modules<'m>(
    scope: RunScope<'_>,
    pipeline: &str,
    modules: impl IntoIterator<Item = (&'m (dyn Module + 'static), ModuleId, Arc<dyn ExecutionCache>)>,
    inputs: Vec<Document>,
) -> Result<Vec<Document>, ExecutionError> {
    let mut current = inputs;
    for (index, (module, module_id, cache)) in modules.into_iter().enumerate() {
        let step = index + 1;
        if scope.cancellation.is_cancelled() {
            tracing::info!(pipeline, step, "execution cancelled");
            return Err(ExecutionError::Cancelled {
                pipeline: pipeline.to_string(),
            });
        }

        let context = ExecutionContext::new(scope, pipeline, module, module_id, cache);
        let input_count = current.len();
        let started = Instant::now();
        current = module
            .execute(current, &context)
            .map_err(|source| ExecutionError::Module {
                pipeline: pipeline.to_string(),
                module: module.name().to_string(),
                step,
                source,
            })?;
        tracing::debug!(
            pipeline,
            module = module.name(),
            step,
            inputs = input_count,
            outputs = current.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "module step complete"
        );
    }
    Ok(current)
}

#[derive(Clone)]
struct PipelineModule {
    id: ModuleId,
    module: Arc<dyn Module>,
}

impl PipelineModule {
    fn new(module: Arc<dyn Module>) -> Self {
        Self {
            id: ModuleId::next(),
            module,
        }
    }
}

/// A named, ordered list of modules.
pub struct Pipeline {
    name: String,
    modules: Vec<PipelineModule>,
    process_documents_once: bool,
}

impl Pipeline {
    fn new(name: String, modules: ModuleList) -> Self {
        Self {
            name,
            modules: modules.into_iter().map(PipelineModule::new).collect(),
            process_documents_once: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Append a module.
    pub fn add(&mut self, module: impl Module + 'static) -> &mut Self {
        self.add_shared(Arc::new(module))
    }

    /// Append an already shared module. Each appearance gets its own cache
    /// namespace.
    pub fn add_shared(&mut self, module: Arc<dyn Module>) -> &mut Self {
        self.modules.push(PipelineModule::new(module));
        self
    }

    /// Insert a module at `index` (clamped to the end).
    pub fn insert(&mut self, index: usize, module: Arc<dyn Module>) -> &mut Self {
        let index = index.min(self.modules.len());
        self.modules.insert(index, PipelineModule::new(module));
        self
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.module.name()).collect()
    }

    pub(crate) fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.iter().map(|m| m.id)
    }

    /// Whether the result is computed on the first run only and reused after.
    pub fn process_documents_once(&self) -> bool {
        self.process_documents_once
    }

    pub fn set_process_documents_once(&mut self, once: bool) -> &mut Self {
        self.process_documents_once = once;
        self
    }

    pub(crate) fn execute(
        &self,
        scope: RunScope<'_>,
        inputs: Vec<Document>,
    ) -> Result<Vec<Document>, ExecutionError> {
        run_modules(
            scope,
            &self.name,
            self.modules
                .iter()
                .map(|m| (m.module.as_ref(), m.id, scope.caches.cache_for(m.id))),
            inputs,
        )
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("modules", &self.module_names())
            .field("process_documents_once", &self.process_documents_once)
            .finish()
    }
}

/// Registered pipelines in execution order.
#[derive(Debug, Default)]
pub struct PipelineCollection {
    pipelines: Vec<Pipeline>,
}

impl PipelineCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline. `None` picks the name `Pipeline N`.
    pub fn add(&mut self, name: Option<&str>, modules: ModuleList) -> Result<&mut Pipeline, EngineError> {
        let name = match name {
            Some(name) if name.trim().is_empty() => return Err(EngineError::InvalidPipelineName),
            Some(name) => name.to_string(),
            None => format!("Pipeline {}", self.pipelines.len() + 1),
        };
        if self.contains(&name) {
            return Err(EngineError::DuplicatePipeline(name));
        }
        self.pipelines.push(Pipeline::new(name, modules));
        let added = self.pipelines.len() - 1;
        Ok(&mut self.pipelines[added])
    }

    pub fn get(&self, name: &str) -> Option<&Pipeline> {
        let folded = fold_name(name);
        self.pipelines.iter().find(|p| fold_name(&p.name) == folded)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Pipeline> {
        let folded = fold_name(name);
        self.pipelines.iter_mut().find(|p| fold_name(&p.name) == folded)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Pipeline> {
        let folded = fold_name(name);
        let index = self
            .pipelines
            .iter()
            .position(|p| fold_name(&p.name) == folded)?;
        Some(self.pipelines.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pipeline> {
        self.pipelines.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl<'a> IntoIterator for &'a PipelineCollection {
    type Item = &'a Pipeline;
    type IntoIter = std::slice::Iter<'a, Pipeline>;

    fn into_iter(self) -> Self::IntoIter {
        self.pipelines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use crate::context::CancellationToken;
    use crate::document::Content;
    use crate::engine::DocumentCollection;
    use crate::metadata::{Metadata, item};
    use crate::module::ModuleError;
    use crate::modules;
    use crate::modules::Execute;
    use crate::test_helpers::{Recorder, TrackedStream, failing, no_items, seed};
    use std::sync::atomic::Ordering;

    struct Fixture {
        global: Metadata,
        documents: DocumentCollection,
        caches: CacheRegistry,
        cancellation: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                global: Metadata::new(),
                documents: DocumentCollection::default(),
                caches: CacheRegistry::new(true),
                cancellation: CancellationToken::new(),
            }
        }

        fn scope(&self) -> RunScope<'_> {
            RunScope {
                global_metadata: &self.global,
                documents: &self.documents,
                caches: &self.caches,
                cancellation: &self.cancellation,
            }
        }

        fn run(&self, pipeline: &Pipeline) -> Result<Vec<Document>, ExecutionError> {
            pipeline.execute(self.scope(), Vec::new())
        }
    }

    fn pipeline(modules: ModuleList) -> Pipeline {
        Pipeline::new("Test".into(), modules)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn omitted_names_are_numbered() {
        let mut pipelines = PipelineCollection::new();
        pipelines.add(None, Vec::new()).unwrap();
        pipelines.add(Some("Assets"), Vec::new()).unwrap();
        pipelines.add(None, Vec::new()).unwrap();
        assert_eq!(pipelines.names(), vec!["Pipeline 1", "Assets", "Pipeline 3"]);
    }

    #[test]
    fn duplicate_names_rejected_case_insensitively() {
        let mut pipelines = PipelineCollection::new();
        pipelines.add(Some("Pages"), Vec::new()).unwrap();
        let err = pipelines.add(Some("PAGES"), Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePipeline(n) if n == "PAGES"));
    }

    #[test]
    fn auto_name_colliding_with_explicit_name_is_duplicate() {
        let mut pipelines = PipelineCollection::new();
        pipelines.add(Some("pipeline 2"), Vec::new()).unwrap();
        assert!(matches!(
            pipelines.add(None, Vec::new()),
            Err(EngineError::DuplicatePipeline(_))
        ));
    }

    #[test]
    fn blank_name_rejected() {
        let mut pipelines = PipelineCollection::new();
        assert!(matches!(
            pipelines.add(Some("  "), Vec::new()),
            Err(EngineError::InvalidPipelineName)
        ));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut pipelines = PipelineCollection::new();
        pipelines
            .add(Some("Posts"), modules![seed(1)])
            .unwrap()
            .set_process_documents_once(true);
        let p = pipelines.get("posts").unwrap();
        assert_eq!(p.name(), "Posts");
        assert!(p.process_documents_once());
        assert!(pipelines.remove("POSTS").is_some());
        assert!(pipelines.is_empty());
    }

    #[test]
    fn modules_can_be_appended_and_inserted() {
        let mut p = pipeline(Vec::new());
        p.add(seed(1)).add(seed(2));
        p.insert(0, Arc::new(Execute::new(|docs, _| Ok(docs)).named("First")));
        assert_eq!(p.module_names(), vec!["First", "Execute", "Execute"]);
        assert_eq!(p.module_ids().count(), 3);
    }

    // =========================================================================
    // Document threading
    // =========================================================================

    #[test]
    fn each_module_sees_previous_output() {
        let recorder = Recorder::new();
        let p = pipeline(modules![
            seed(3),
            recorder.module(),
            Execute::new(|mut docs, _| {
                docs.truncate(1);
                Ok(docs)
            }),
            recorder.module(),
        ]);
        let out = Fixture::new().run(&p).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(recorder.input_counts(), vec![3, 1]);
    }

    #[test]
    fn empty_pipeline_returns_inputs() {
        let fixture = Fixture::new();
        let doc = Document::new(None, Metadata::new(), Content::text("x"));
        let out = pipeline(Vec::new())
            .execute(fixture.scope(), vec![doc.clone()])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ptr_eq(&doc));
    }

    #[test]
    fn failure_aborts_remaining_modules() {
        let recorder = Recorder::new();
        let p = pipeline(modules![seed(2), failing("broken"), recorder.module()]);
        let err = Fixture::new().run(&p).unwrap_err();

        match err {
            ExecutionError::Module {
                pipeline,
                module,
                step,
                source,
            } => {
                assert_eq!(pipeline, "Test");
                assert_eq!(module, "Execute");
                assert_eq!(step, 2);
                assert!(matches!(source, ModuleError::Message(m) if m == "broken"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(recorder.calls(), 0);
    }

    #[test]
    fn cancellation_checked_before_each_step() {
        let fixture = Fixture::new();
        let recorder = Recorder::new();
        let token = fixture.cancellation.clone();
        let p = pipeline(modules![
            Execute::new(move |docs, _| {
                token.cancel();
                Ok(docs)
            }),
            recorder.module(),
        ]);
        let err = fixture.run(&p).unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled { .. }));
        assert_eq!(recorder.calls(), 0);
    }

    #[test]
    fn dropped_intermediate_documents_release_streams() {
        let (stream, released) = TrackedStream::new(b"payload");
        let stream = std::sync::Mutex::new(Some(stream));
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = released.clone();
        let seen = observed.clone();
        let p = pipeline(modules![
            Execute::new(move |_, ctx| {
                let taken = stream.lock().unwrap().take().unwrap();
                Ok(vec![ctx.document_from_stream(Some("s.bin"), taken, [item("k", 1)])?])
            }),
            Execute::new(|_, ctx| Ok(vec![ctx.document_from_text(None, "replacement", no_items())?])),
            Execute::new(move |docs, _| {
                seen.store(flag.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(docs)
            }),
        ]);
        let out = Fixture::new().run(&p).unwrap();
        assert_eq!(out.len(), 1);
        assert!(observed.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn top_level_modules_get_distinct_caches() {
        let fixture = Fixture::new();
        let p = pipeline(modules![
            Execute::new(|docs, ctx| {
                ctx.cache().set("k", Arc::new(1u8));
                Ok(docs)
            }),
            Execute::new(|docs, ctx| {
                if ctx.cache().contains_key("k") {
                    return Err(ModuleError::msg("namespace leaked"));
                }
                Ok(docs)
            }),
        ]);
        fixture.run(&p).unwrap();
        assert_eq!(fixture.caches.stats().entries, 1);
    }
}
