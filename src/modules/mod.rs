//! Built-in modules.
//!
//! | Module | Output |
//! |--------|--------|
//! | [`Execute`] | whatever a closure returns, for the whole list or per document |
//! | [`Meta`] | every input, cloned with one more metadata entry |
//! | [`ReplaceContent`] | every input, cloned with new text content |
//! | [`Where`] | inputs matching a predicate |
//! | [`Take`] | the first N inputs |
//! | [`OrderBy`] | inputs stably sorted by a metadata key |
//! | [`Documents`] | stored results of earlier pipelines, replacing the input |
//! | [`ForEach`] | child modules run once per input, results concatenated |
//! | [`Branch`] | the unmodified input; child output discarded |
//! | [`ConcatBranch`] | the input followed by the child output |
//! | [`Concat`] | the input followed by the output of children run on all of it |
//! | [`If`] | each input routed to the first matching branch |
//!
//! The last four are control combinators: they run child module lists
//! through [`ExecutionContext::execute`](crate::context::ExecutionContext::execute),
//! so children behave exactly like pipeline steps and share the
//! combinator's cache namespace.

mod control;
mod documents;
mod execute;
mod filter;
mod meta;

pub use control::{Branch, Concat, ConcatBranch, ForEach, If};
pub use documents::Documents;
pub use execute::Execute;
pub use filter::{OrderBy, Take, Where};
pub use meta::{Meta, ReplaceContent};
