//! Shared test utilities.
//!
//! Small modules for building pipelines in tests, a stream that reports
//! when it is dropped, and lookups that panic with a clear message on miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let recorder = Recorder::new();
//! let out = run_single(&[("Site", json!("Folio"))], modules![
//!     text_docs(&["a.md", "b.md"]),
//!     recorder.module(),
//! ]);
//!
//! assert_eq!(recorder.input_counts(), vec![2]);
//! assert_eq!(find_doc(&out, "a.md").get_string("site").as_deref(), Some("Folio"));
//! ```

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::engine::Engine;
use crate::metadata::{MetadataItem, item};
use crate::module::{Module, ModuleError, ModuleList, ModuleResult};
use crate::modules::Execute;
use serde_json::Value;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// =========================================================================
// Running
// =========================================================================

/// Run `modules` as the only pipeline of a fresh engine and return its
/// result.
pub fn run_single(globals: &[(&str, Value)], modules: ModuleList) -> Vec<Document> {
    let mut engine = Engine::new();
    engine
        .set_global_metadata(globals.iter().map(|(k, v)| item(*k, v.clone())))
        .unwrap();
    engine.add_pipeline(Some("Test"), modules).unwrap();
    if let Err(err) = engine.execute() {
        panic!("pipeline failed: {err}");
    }
    engine.documents().get("Test").unwrap().to_vec()
}

pub fn no_items() -> Vec<MetadataItem> {
    Vec::new()
}

// =========================================================================
// Modules
// =========================================================================

/// Ignores its input and emits `count` empty documents numbered by `Index`.
pub fn seed(count: usize) -> Execute {
    Execute::new(move |_, ctx| {
        (0..count)
            .map(|i| ctx.empty_document([item("Index", i)]).map_err(ModuleError::from))
            .collect()
    })
}

/// Ignores its input and emits one text document per name; the name is
/// both the source and the content.
pub fn text_docs(names: &[&str]) -> Execute {
    let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    Execute::new(move |_, ctx| {
        names
            .iter()
            .map(|name| {
                ctx.document_from_text(Some(name.as_str()), name.clone(), no_items())
                    .map_err(ModuleError::from)
            })
            .collect()
    })
}

/// Always fails with `message`.
pub fn failing(message: &'static str) -> Execute {
    Execute::new(move |_, _| Err(ModuleError::msg(message)))
}

/// Records how many documents each call received, shared across clones.
#[derive(Clone, Default)]
pub struct Recorder {
    inputs: Arc<Mutex<Vec<usize>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pass-through module reporting into this recorder.
    pub fn module(&self) -> RecordingModule {
        RecordingModule {
            inputs: self.inputs.clone(),
        }
    }

    pub fn input_counts(&self) -> Vec<usize> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

pub struct RecordingModule {
    inputs: Arc<Mutex<Vec<usize>>>,
}

impl Module for RecordingModule {
    fn execute(&self, inputs: Vec<Document>, _: &ExecutionContext<'_>) -> ModuleResult {
        self.inputs.lock().unwrap().push(inputs.len());
        Ok(inputs)
    }
}

// =========================================================================
// Streams
// =========================================================================

/// An in-memory stream that flips a flag when dropped.
pub struct TrackedStream {
    inner: Cursor<Vec<u8>>,
    released: Arc<AtomicBool>,
}

impl TrackedStream {
    pub fn new(bytes: &[u8]) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let stream = Self {
            inner: Cursor::new(bytes.to_vec()),
            released: released.clone(),
        };
        (stream, released)
    }
}

impl Read for TrackedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for TrackedStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

// =========================================================================
// Lookups (panic with a clear message on miss)
// =========================================================================

/// Source identifiers in order; documents without one show as `""`.
pub fn sources(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d.source().unwrap_or("")).collect()
}

/// Find a document by source. Panics if not found.
pub fn find_doc<'a>(docs: &'a [Document], source: &str) -> &'a Document {
    docs.iter()
        .find(|d| d.source() == Some(source))
        .unwrap_or_else(|| panic!("document '{source}' not found. Available: {:?}", sources(docs)))
}
