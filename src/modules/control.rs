//! Control combinators.
//!
//! Each combinator runs one or more child module lists through
//! [`ExecutionContext::execute`]. Children see the documents they are given
//! exactly as pipeline steps would, share the combinator's cache namespace,
//! and fail the combinator (and so the pipeline) on any error.
//!
//! ```text
//! Branch        in ──┬──────────────────────────────▶ in
//!                    └─ filter ─▶ children ─▶ (dropped)
//!
//! ConcatBranch  in ──┬──────────────────────────────▶ in ++ out
//!                    └─ filter ─▶ children ─▶ out ──┘
//!
//! If            in ─▶ first matching condition ─▶ its children ─▶ out₁ ++ out₂ ++ … ++ unmatched
//! ```

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::module::{ContextPredicate, DocumentPredicate, Module, ModuleList, ModuleResult};
use std::sync::Arc;

fn select(
    inputs: &[Document],
    predicate: Option<&DocumentPredicate>,
    context: &ExecutionContext<'_>,
) -> Vec<Document> {
    match predicate {
        Some(predicate) => inputs
            .iter()
            .filter(|doc| predicate(*doc, context))
            .cloned()
            .collect(),
        None => inputs.to_vec(),
    }
}

// =============================================================================
// Branch / ConcatBranch / Concat
// =============================================================================

/// Runs child modules for their side effects and passes the input through
/// unchanged.
pub struct Branch {
    modules: ModuleList,
    predicate: Option<DocumentPredicate>,
}

impl Branch {
    pub fn new(modules: ModuleList) -> Self {
        Self {
            modules,
            predicate: None,
        }
    }

    /// Only documents matching `predicate` are sent to the children.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl Module for Branch {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        let selected = select(&inputs, self.predicate.as_ref(), context);
        let produced = context.execute(&self.modules, selected)?;
        tracing::trace!(discarded = produced.len(), "branch output discarded");
        Ok(inputs)
    }
}

/// Like [`Branch`], but the children's output is appended to the input.
pub struct ConcatBranch {
    modules: ModuleList,
    predicate: Option<DocumentPredicate>,
}

impl ConcatBranch {
    pub fn new(modules: ModuleList) -> Self {
        Self {
            modules,
            predicate: None,
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl Module for ConcatBranch {
    fn execute(&self, mut inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        let selected = select(&inputs, self.predicate.as_ref(), context);
        let produced = context.execute(&self.modules, selected)?;
        inputs.extend(produced);
        Ok(inputs)
    }
}

/// Runs child modules against the whole input and appends their output.
pub struct Concat {
    inner: ConcatBranch,
}

impl Concat {
    pub fn new(modules: ModuleList) -> Self {
        Self {
            inner: ConcatBranch::new(modules),
        }
    }
}

impl Module for Concat {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        self.inner.execute(inputs, context)
    }
}

// =============================================================================
// ForEach
// =============================================================================

/// Runs child modules once per input document, concatenating the results
/// in input order.
pub struct ForEach {
    modules: ModuleList,
}

impl ForEach {
    pub fn new(modules: ModuleList) -> Self {
        Self { modules }
    }
}

impl Module for ForEach {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        let mut outputs = Vec::new();
        for doc in inputs {
            outputs.extend(context.execute(&self.modules, vec![doc])?);
        }
        Ok(outputs)
    }
}

// =============================================================================
// If / ElseIf / Else
// =============================================================================

enum Condition {
    Document(DocumentPredicate),
    Context(ContextPredicate),
}

struct Arm {
    condition: Condition,
    modules: ModuleList,
}

/// Routes each document to the first arm whose condition holds.
///
/// Conditions are tried in declaration order and a routed document is never
/// offered to a later arm. Each arm runs once with its whole batch; an arm
/// that matched nothing is not run. A context condition is evaluated once
/// per execution and takes every document still unrouted.
///
/// Documents no arm took are handed to [`If::otherwise`] when given, else
/// passed through unchanged after all arm output (or dropped with
/// [`If::without_unmatched`]).
pub struct If {
    arms: Vec<Arm>,
    otherwise: Option<ModuleList>,
    keep_unmatched: bool,
}

impl If {
    pub fn new<F>(predicate: F, modules: ModuleList) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::starting(Condition::Document(Arc::new(predicate)), modules)
    }

    pub fn when_context<F>(predicate: F, modules: ModuleList) -> Self
    where
        F: Fn(&ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::starting(Condition::Context(Arc::new(predicate)), modules)
    }

    fn starting(condition: Condition, modules: ModuleList) -> Self {
        Self {
            arms: vec![Arm { condition, modules }],
            otherwise: None,
            keep_unmatched: true,
        }
    }

    pub fn else_if<F>(mut self, predicate: F, modules: ModuleList) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.arms.push(Arm {
            condition: Condition::Document(Arc::new(predicate)),
            modules,
        });
        self
    }

    pub fn else_if_context<F>(mut self, predicate: F, modules: ModuleList) -> Self
    where
        F: Fn(&ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.arms.push(Arm {
            condition: Condition::Context(Arc::new(predicate)),
            modules,
        });
        self
    }

    /// Modules for every document no earlier arm took.
    pub fn otherwise(mut self, modules: ModuleList) -> Self {
        self.otherwise = Some(modules);
        self
    }

    /// Drop unmatched documents instead of passing them through.
    pub fn without_unmatched(mut self) -> Self {
        self.keep_unmatched = false;
        self
    }
}

impl Module for If {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        let mut remaining = inputs;
        let mut outputs = Vec::new();

        for arm in &self.arms {
            let (matched, rest): (Vec<Document>, Vec<Document>) = match &arm.condition {
                Condition::Document(predicate) => remaining
                    .into_iter()
                    .partition(|doc| predicate(doc, context)),
                Condition::Context(predicate) if predicate(context) => (remaining, Vec::new()),
                Condition::Context(_) => (Vec::new(), remaining),
            };
            remaining = rest;
            if !matched.is_empty() {
                outputs.extend(context.execute(&arm.modules, matched)?);
            }
        }

        match &self.otherwise {
            Some(modules) if !remaining.is_empty() => {
                outputs.extend(context.execute(modules, remaining)?);
            }
            Some(_) => {}
            None if self.keep_unmatched => outputs.extend(remaining),
            None => {}
        }
        Ok(outputs)
    }
}
