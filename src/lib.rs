//! # Folio
//!
//! The execution core of a static content generator. Content flows through
//! named **pipelines**; each pipeline is an ordered list of **modules**, and
//! each module turns a list of immutable **documents** into a new list.
//! Converters, file I/O, templating and the CLI live outside this crate and
//! plug in as ordinary modules.
//!
//! # Architecture
//!
//! ```text
//!                     Engine::execute()
//!                            │
//!   reset cache hits ────────┤
//!                            ▼
//!   Pipeline 1:  [seed] ─▶ m1 ─▶ m2 ─▶ … ─▶ stored result ──┐
//!   Pipeline 2:  [seed] ─▶ m1 ─▶ Documents("Pipeline 1") ◀──┘ ─▶ …
//!                            │
//!   sweep unhit cache entries┘
//! ```
//!
//! - Every step runs to completion before the next starts; there is no lazy
//!   propagation.
//! - Every pipeline starts from one empty document carrying the engine's
//!   global metadata.
//! - Pipelines run in registration order, so a later pipeline can read an
//!   earlier one's result.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`metadata`] | Layered, case-insensitive key/value stack with computed values |
//! | [`convert`] | Best-effort conversion behind the typed metadata accessors |
//! | [`document`] | Immutable documents, lineage ids, text and stream content |
//! | [`cache`] | Per-module mark-and-sweep caches for incremental builds |
//! | [`context`] | The facade a module receives: document factory, nested execution, cache |
//! | [`module`] | The `Module` trait and module errors |
//! | [`pipeline`] | Pipelines, registration, and the step loop |
//! | [`engine`] | Run orchestration, stored results, failure policy |
//! | [`modules`] | Built-in modules and the Branch / ConcatBranch / If combinators |
//! | [`config`] | `engine.toml` loading, merging and validation |
//! | [`error`] | Execution and engine errors |
//! | [`report`] | Per-run summaries |
//!
//! # Design Decisions
//!
//! ## Immutable Documents
//!
//! A document is never changed in place. "Changing" one means cloning it
//! with extra metadata or new content: the clone gets one more metadata
//! layer on top of a shared copy of the original's layers, keeps the
//! original's lineage id, and shares its content unless replaced. Documents
//! are therefore safe to hand to rayon workers without locks.
//!
//! ## Ownership Instead of Disposal
//!
//! Modules receive their inputs by value. Anything a step does not return is
//! dropped when the step returns, and a stream owned by a document is closed
//! when the last document sharing it goes away.
//!
//! ## Explicit Run Scope
//!
//! Nothing is global. Global metadata, stored results, caches and the
//! cancellation flag reach modules through the
//! [`ExecutionContext`](context::ExecutionContext) built for each step.
//!
//! ## Cycles Fail Fast
//!
//! A computed metadata value may read other keys. A computed value that ends
//! up reading itself fails with
//! [`MetadataError::CyclicReference`](metadata::MetadataError::CyclicReference)
//! instead of recursing until the stack overflows.
//!
//! # Example
//!
//! ```rust
//! use folio::engine::Engine;
//! use folio::metadata::item;
//! use folio::modules;
//! use folio::modules::{Execute, If, Meta};
//!
//! let mut engine = Engine::new();
//! engine.set_global_metadata([item("Site", "Folio")]).unwrap();
//! engine
//!     .add_pipeline(
//!         Some("Pages"),
//!         modules![
//!             Execute::new(|_, ctx| {
//!                 Ok(vec![
//!                     ctx.document_from_text(Some("about.md"), "About", [item("Draft", false)])?,
//!                     ctx.document_from_text(Some("wip.md"), "WIP", [item("Draft", true)])?,
//!                 ])
//!             }),
//!             If::new(
//!                 |doc, _| doc.metadata().get_bool("draft") == Some(true),
//!                 modules![Meta::new("Robots", "noindex")],
//!             ),
//!         ],
//!     )
//!     .unwrap();
//!
//! let report = engine.execute().unwrap();
//! assert_eq!(report.total_documents(), 2);
//!
//! let pages = engine.documents().get("pages").unwrap();
//! assert_eq!(pages[0].source(), Some("wip.md"));
//! assert_eq!(pages[0].get_string("robots").as_deref(), Some("noindex"));
//! assert_eq!(pages[1].get_string("site").as_deref(), Some("Folio"));
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod convert;
pub mod document;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod module;
pub mod modules;
pub mod pipeline;
pub mod report;

pub use context::ExecutionContext;
pub use document::Document;
pub use engine::Engine;
pub use error::{EngineError, ExecutionError};
pub use module::{Module, ModuleError, ModuleResult};

#[cfg(test)]
pub(crate) mod test_helpers;
