//! Layered, immutable metadata with lazily computed values.
//!
//! A [`Metadata`] value is a stack of layers. Each layer is an immutable map
//! from case-insensitive keys to [`MetaValue`]s; lookups scan from the most
//! recently pushed layer down to the oldest and return the first match.
//!
//! ```text
//! S0 = {}                          Title → KeyNotFound
//! S1 = S0.clone_with(Title=Hello)  Title → "Hello"
//! S2 = S1.clone_with(Title=World)  Title → "World"   (S1 still sees "Hello")
//! ```
//!
//! # Sharing
//!
//! Layers are reference counted. [`Metadata::clone_with`] copies the layer
//! *ordering* (a vector of `Arc`s) and pushes one new layer, so deriving a
//! stack never touches the layers of its source and never copies entries.
//! Nothing here needs a lock: a stack is never mutated after construction.
//!
//! # Computed values
//!
//! A [`MetaValue::Computed`] entry holds a [`ComputedValue`] which is invoked
//! with the requested key and the *whole* view on every access. Results are
//! not memoized. A computed value may read other keys from the same view; a
//! chain that comes back to a key already being resolved on the current
//! thread fails with [`MetadataError::CyclicReference`] instead of recursing
//! forever.
//!
//! # Counting
//!
//! [`Metadata::len`] is the sum of the per-layer entry counts, so a key that
//! is shadowed by a later layer is counted once per layer. [`Metadata::keys`]
//! and [`Metadata::entries`] de-duplicate, reporting the topmost value.

use crate::convert;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidArgument(String),
    #[error("metadata key not found: {0}")]
    KeyNotFound(String),
    #[error("cyclic computed metadata value for key {0}")]
    CyclicReference(String),
    #[error("computed metadata value for key {key} failed: {message}")]
    Computed { key: String, message: String },
}

/// A value computed from the enclosing metadata view at access time.
pub trait ComputedValue: Send + Sync {
    fn compute(&self, key: &str, metadata: &Metadata) -> Result<Value, MetadataError>;
}

impl<F> ComputedValue for F
where
    F: Fn(&str, &Metadata) -> Result<Value, MetadataError> + Send + Sync,
{
    fn compute(&self, key: &str, metadata: &Metadata) -> Result<Value, MetadataError> {
        self(key, metadata)
    }
}

/// A stored metadata value: either a literal or a computation.
#[derive(Clone)]
pub enum MetaValue {
    Literal(Value),
    Computed(Arc<dyn ComputedValue>),
}

impl MetaValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        MetaValue::Literal(value.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&str, &Metadata) -> Result<Value, MetadataError> + Send + Sync + 'static,
    {
        MetaValue::Computed(Arc::new(f))
    }
}

impl fmt::Debug for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Literal(value) => write!(f, "Literal({value})"),
            MetaValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// A key and value pair to push onto a stack.
pub type MetadataItem = (String, MetaValue);

/// Shorthand for a literal [`MetadataItem`].
pub fn item(key: impl Into<String>, value: impl Into<Value>) -> MetadataItem {
    (key.into(), MetaValue::literal(value))
}

/// Shorthand for a computed [`MetadataItem`].
pub fn computed_item<F>(key: impl Into<String>, f: F) -> MetadataItem
where
    F: Fn(&str, &Metadata) -> Result<Value, MetadataError> + Send + Sync + 'static,
{
    (key.into(), MetaValue::computed(f))
}

#[derive(Debug)]
struct Entry {
    key: String,
    value: MetaValue,
}

/// One immutable layer, keyed by the case-folded key.
#[derive(Debug, Default)]
struct Layer {
    entries: BTreeMap<String, Entry>,
}

fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

fn validate_key(key: &str) -> Result<(), MetadataError> {
    if key.trim().is_empty() {
        return Err(MetadataError::InvalidArgument(key.to_string()));
    }
    Ok(())
}

/// A layered metadata view. Cloning is cheap: only the layer ordering is copied.
#[derive(Clone, Default)]
pub struct Metadata {
    layers: Vec<Arc<Layer>>,
}

impl Metadata {
    /// An empty stack with no layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-layer stack.
    pub fn from_items<I, K>(items: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        Self::new().clone_with(items)
    }

    /// Push one layer holding `items` on top of a copy of this stack's layers.
    ///
    /// `self` is left untouched. Within `items` the last write for a key wins.
    pub fn clone_with<I, K>(&self, items: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        let mut layer = Layer::default();
        for (key, value) in items {
            let key = key.into();
            validate_key(&key)?;
            layer.entries.insert(fold_key(&key), Entry { key, value });
        }
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.extend(self.layers.iter().cloned());
        layers.push(Arc::new(layer));
        Ok(Self { layers })
    }

    /// Resolve `key`, invoking a computed value if that is what is stored.
    pub fn get(&self, key: &str) -> Result<Value, MetadataError> {
        validate_key(key)?;
        let folded = fold_key(key);
        let entry = self
            .find(&folded)
            .ok_or_else(|| MetadataError::KeyNotFound(key.to_string()))?;
        self.resolve(key, folded, &entry.value)
    }

    /// Resolve `key`, returning `None` when it is absent, invalid, or its
    /// computed value fails.
    pub fn try_get(&self, key: &str) -> Option<Value> {
        match self.get(key) {
            Ok(value) => Some(value),
            Err(MetadataError::KeyNotFound(_)) | Err(MetadataError::InvalidArgument(_)) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "metadata value could not be resolved");
                None
            }
        }
    }

    /// The stored value for `key` without resolving computed values.
    pub fn get_raw(&self, key: &str) -> Option<&MetaValue> {
        self.find(&fold_key(key)).map(|entry| &entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find(&fold_key(key)).is_some()
    }

    /// Sum of per-layer entry counts. Shadowed keys are counted once per
    /// layer they appear in.
    pub fn len(&self) -> usize {
        self.layers.iter().map(|layer| layer.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.entries.is_empty())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Distinct keys, topmost spelling, in case-folded order.
    pub fn keys(&self) -> Vec<String> {
        self.visible().into_iter().map(|e| e.key.clone()).collect()
    }

    /// Distinct entries with shadowing resolved, unevaluated.
    pub fn entries(&self) -> Vec<(String, MetaValue)> {
        self.visible()
            .into_iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Distinct entries with every computed value resolved.
    ///
    /// Each call re-invokes every computed value.
    pub fn resolve_all(&self) -> Result<Vec<(String, Value)>, MetadataError> {
        self.visible()
            .into_iter()
            .map(|e| {
                let value = self.resolve(&e.key, fold_key(&e.key), &e.value)?;
                Ok((e.key.clone(), value))
            })
            .collect()
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Resolve and convert `key`, `None` if absent or not convertible.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.try_get(key).and_then(|value| convert::convert(&value))
    }

    /// Resolve and convert `key`, falling back to `default`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.try_get(key)
            .and_then(|value| convert::to_display_string(&value))
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_as(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_as(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_as(key)
    }

    pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        self.try_get(key)
            .and_then(|value| convert::convert_list(&value))
    }

    pub fn get_list_or<T: DeserializeOwned>(&self, key: &str, default: Vec<T>) -> Vec<T> {
        self.get_list(key).unwrap_or(default)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn find(&self, folded: &str) -> Option<&Entry> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(folded))
    }

    fn visible(&self) -> Vec<&Entry> {
        let mut seen = HashSet::new();
        let mut visible: Vec<(&String, &Entry)> = Vec::new();
        for layer in self.layers.iter().rev() {
            for (folded, entry) in &layer.entries {
                if seen.insert(folded.as_str()) {
                    visible.push((folded, entry));
                }
            }
        }
        visible.sort_by(|a, b| a.0.cmp(b.0));
        visible.into_iter().map(|(_, entry)| entry).collect()
    }

    fn resolve(&self, key: &str, folded: String, value: &MetaValue) -> Result<Value, MetadataError> {
        match value {
            MetaValue::Literal(literal) => Ok(literal.clone()),
            MetaValue::Computed(computed) => {
                let _guard = ResolutionGuard::enter(self.view_id(), folded)?;
                computed.compute(key, self)
            }
        }
    }

    /// Identity of this view for cycle detection: clones of a stack share it.
    fn view_id(&self) -> (usize, usize) {
        let top = self
            .layers
            .last()
            .map(|layer| Arc::as_ptr(layer) as usize)
            .unwrap_or(0);
        (top, self.layers.len())
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.visible().into_iter().map(|e| (&e.key, &e.value)))
            .finish()
    }
}

// =============================================================================
// Cycle detection
// =============================================================================

type ResolutionFrame = ((usize, usize), String);

thread_local! {
    static RESOLVING: RefCell<Vec<ResolutionFrame>> = const { RefCell::new(Vec::new()) };
}

/// Marks a (view, key) pair as being resolved on this thread until dropped.
struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(view: (usize, usize), folded: String) -> Result<Self, MetadataError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(v, k)| *v == view && *k == folded) {
                return Err(MetadataError::CyclicReference(folded));
            }
            stack.push((view, folded));
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stack(items: &[(&str, Value)]) -> Metadata {
        Metadata::from_items(
            items
                .iter()
                .map(|(k, v)| (k.to_string(), MetaValue::Literal(v.clone()))),
        )
        .unwrap()
    }

    // =========================================================================
    // Lookup and shadowing
    // =========================================================================

    #[test]
    fn clone_shadows_without_mutating_source() {
        let original = stack(&[("A", json!("a"))]);
        let clone = original.clone_with([item("A", "b")]).unwrap();

        assert_eq!(clone.get("A").unwrap(), json!("b"));
        assert_eq!(original.get("A").unwrap(), json!("a"));
    }

    #[test]
    fn title_scenario_across_three_stacks() {
        let s0 = Metadata::new();
        let s1 = s0.clone_with([item("Title", "Hello")]).unwrap();
        let s2 = s1.clone_with([item("Title", "World")]).unwrap();

        assert_eq!(
            s0.get("Title"),
            Err(MetadataError::KeyNotFound("Title".into()))
        );
        assert_eq!(s1.get("Title").unwrap(), json!("Hello"));
        assert_eq!(s2.get("Title").unwrap(), json!("World"));
    }

    #[test]
    fn missing_key_is_key_not_found() {
        let empty = Metadata::new();
        assert!(matches!(
            empty.get("Nope"),
            Err(MetadataError::KeyNotFound(_))
        ));
        assert_eq!(empty.try_get("Nope"), None);
    }

    #[test]
    fn empty_key_is_invalid_argument() {
        let empty = Metadata::new();
        assert!(matches!(
            empty.get(""),
            Err(MetadataError::InvalidArgument(_))
        ));
        assert!(matches!(
            empty.get("   "),
            Err(MetadataError::InvalidArgument(_))
        ));
        assert_eq!(empty.try_get(""), None);
    }

    #[test]
    fn empty_key_rejected_on_insert() {
        let result = Metadata::new().clone_with([item("", 1)]);
        assert!(matches!(result, Err(MetadataError::InvalidArgument(_))));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let m = stack(&[("Title", json!("x"))]);
        assert_eq!(m.get("title").unwrap(), json!("x"));
        assert_eq!(m.get("TITLE").unwrap(), json!("x"));
        assert!(m.contains_key("tItLe"));
    }

    #[test]
    fn last_write_wins_within_one_layer() {
        let m = Metadata::from_items([item("k", 1), item("K", 2)]).unwrap();
        assert_eq!(m.get("k").unwrap(), json!(2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn clone_pushes_exactly_one_layer() {
        let m = stack(&[("a", json!(1))]);
        let c = m.clone_with(Vec::<MetadataItem>::new()).unwrap();
        assert_eq!(m.layer_count(), 1);
        assert_eq!(c.layer_count(), 2);
    }

    // =========================================================================
    // Enumeration and counting
    // =========================================================================

    #[test]
    fn keys_deduplicate_with_topmost_spelling() {
        let m = stack(&[("title", json!("a")), ("Author", json!("b"))])
            .clone_with([item("TITLE", "c")])
            .unwrap();
        assert_eq!(m.keys(), vec!["Author".to_string(), "TITLE".to_string()]);
        let resolved = m.resolve_all().unwrap();
        assert_eq!(resolved[1], ("TITLE".to_string(), json!("c")));
    }

    #[test]
    fn len_counts_shadowed_keys_per_layer() {
        let m = stack(&[("a", json!(1)), ("b", json!(2))])
            .clone_with([item("a", 3)])
            .unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.keys().len(), 2);
    }

    #[test]
    fn clone_without_items_keeps_full_metadata_set() {
        let m = stack(&[("a", json!(1)), ("b", json!("two"))]);
        let c = m.clone_with(Vec::<MetadataItem>::new()).unwrap();
        assert_eq!(m.resolve_all().unwrap(), c.resolve_all().unwrap());
    }

    // =========================================================================
    // Computed values
    // =========================================================================

    #[test]
    fn computed_value_is_invoked_on_every_access() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let m = Metadata::from_items([computed_item("Now", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("tick"))
        })])
        .unwrap();

        for _ in 0..3 {
            assert_eq!(m.get("Now").unwrap(), json!("tick"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn computed_value_receives_key_and_reads_view() {
        let m = stack(&[("Y", json!("from y"))])
            .clone_with([computed_item("X", |key, meta| {
                assert_eq!(key, "X");
                meta.get("Y")
            })])
            .unwrap();
        assert_eq!(m.get("X").unwrap(), json!("from y"));
    }

    #[test]
    fn computed_value_sees_later_layers() {
        let base = Metadata::from_items([computed_item("Greeting", |_, meta| {
            let name = meta.get_string("Name").unwrap_or_default();
            Ok(json!(format!("Hello {name}")))
        })])
        .unwrap();
        let derived = base.clone_with([item("Name", "Ada")]).unwrap();
        assert_eq!(derived.get("Greeting").unwrap(), json!("Hello Ada"));
    }

    #[test]
    fn cyclic_computed_values_fail_fast() {
        let m = Metadata::from_items([
            computed_item("A", |_, meta| meta.get("B")),
            computed_item("B", |_, meta| meta.get("A")),
        ])
        .unwrap();
        assert!(matches!(
            m.get("A"),
            Err(MetadataError::CyclicReference(_))
        ));
        assert_eq!(m.try_get("A"), None);
        // Guard state is unwound after the failure.
        let ok = m.clone_with([item("B", 1)]).unwrap();
        assert_eq!(ok.get("A").unwrap(), json!(1));
    }

    #[test]
    fn self_reference_is_cyclic() {
        let m = stack(&[("X", json!("outer"))])
            .clone_with([computed_item("X", |key, meta| meta.get(key))])
            .unwrap();
        assert_eq!(
            m.get("X"),
            Err(MetadataError::CyclicReference("x".into()))
        );
    }

    #[test]
    fn enumeration_resolves_computed_values_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let m = Metadata::from_items([computed_item("c", move |_, _| {
            Ok(json!(counter.fetch_add(1, Ordering::SeqCst)))
        })])
        .unwrap();
        m.resolve_all().unwrap();
        m.resolve_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    #[test]
    fn typed_accessors_convert_or_default() {
        let m = stack(&[
            ("count", json!("12")),
            ("draft", json!("true")),
            ("tags", json!(["a", "b"])),
            ("title", json!(5)),
        ]);
        assert_eq!(m.get_i64("count"), Some(12));
        assert_eq!(m.get_bool("draft"), Some(true));
        assert_eq!(
            m.get_list::<String>("tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(m.get_string("title"), Some("5".to_string()));
        assert_eq!(m.get_or("count", 0u8), 12);
        assert_eq!(m.get_or("tags", 0i64), 0);
        assert_eq!(m.get_or("missing", 9i64), 9);
        assert_eq!(m.get_string_or("missing", "none"), "none");
    }
}
