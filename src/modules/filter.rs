//! Selection and ordering.

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::module::{DocumentPredicate, Module, ModuleResult};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Keeps the documents for which the predicate holds.
pub struct Where {
    predicate: DocumentPredicate,
}

impl Where {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Document, &ExecutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl Module for Where {
    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext<'_>) -> ModuleResult {
        Ok(inputs
            .into_iter()
            .filter(|doc| (self.predicate)(doc, context))
            .collect())
    }
}

/// Keeps the first `count` documents.
pub struct Take {
    count: usize,
}

impl Take {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Module for Take {
    fn execute(&self, mut inputs: Vec<Document>, _: &ExecutionContext<'_>) -> ModuleResult {
        inputs.truncate(self.count);
        Ok(inputs)
    }
}

/// Stable sort by a metadata value.
///
/// Numbers (including numeric strings) compare numerically, other strings
/// and booleans by their natural order, and values of different kinds by
/// kind. Documents without the key always sort after those with it,
/// whatever the direction.
pub struct OrderBy {
    key: String,
    descending: bool,
}

impl OrderBy {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            descending: false,
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Sort key for a metadata value. Numeric strings count as numbers so
/// `3` and `"4"` interleave the way front matter authors expect.
enum SortKey<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Text(&'a str),
    Structured(String),
}

impl SortKey<'_> {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Bool(_) => 1,
            SortKey::Number(_) => 2,
            SortKey::Text(_) => 3,
            SortKey::Structured(_) => 4,
        }
    }
}

fn sort_key(value: &Value) -> SortKey<'_> {
    match value {
        Value::Null => SortKey::Null,
        Value::Bool(b) => SortKey::Bool(*b),
        Value::Number(n) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => SortKey::Number(n),
            _ => SortKey::Text(s),
        },
        Value::Array(_) | Value::Object(_) => SortKey::Structured(value.to_string()),
    }
}

/// Total order over metadata values: null, then booleans, numbers, text and
/// finally arrays and objects, each compared within its own kind.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (a, b) = (sort_key(a), sort_key(b));
    match (&a, &b) {
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(y),
        (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(y),
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
        (SortKey::Structured(x), SortKey::Structured(y)) => x.cmp(y),
        _ => a.rank().cmp(&b.rank()),
    }
}

impl Module for OrderBy {
    fn execute(&self, inputs: Vec<Document>, _: &ExecutionContext<'_>) -> ModuleResult {
        let mut keyed: Vec<(Option<Value>, Document)> = inputs
            .into_iter()
            .map(|doc| (doc.try_get(&self.key), doc))
            .collect();

        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => {
                let order = compare_values(a, b);
                if self.descending { order.reverse() } else { order }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Ok(keyed.into_iter().map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::item;
    use crate::modules;
    use crate::modules::{Execute, Meta};
    use crate::test_helpers::{run_single, sources, text_docs};
    use serde_json::json;

    #[test]
    fn where_filters_by_predicate() {
        let out = run_single(
            &[],
            modules![
                text_docs(&["a.md", "b.txt", "c.md"]),
                Where::new(|doc, _| doc.source().is_some_and(|s| s.ends_with(".md")))
            ],
        );
        assert_eq!(sources(&out), vec!["a.md", "c.md"]);
    }

    #[test]
    fn where_can_read_context() {
        let out = run_single(
            &[("Drafts", json!(false))],
            modules![
                text_docs(&["a", "b"]),
                Where::new(|_, ctx| ctx.global_metadata().get_bool("drafts") == Some(true))
            ],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn take_truncates() {
        let out = run_single(&[], modules![text_docs(&["a", "b", "c"]), Take::new(2)]);
        assert_eq!(sources(&out), vec!["a", "b"]);

        let all = run_single(&[], modules![text_docs(&["a"]), Take::new(5)]);
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn order_by_numeric_ascending() {
        let out = run_single(
            &[],
            modules![
                text_docs(&["b", "a", "c"]),
                Meta::for_each("Weight", |doc, _| {
                    Ok(match doc.source() {
                        Some("a") => json!(1),
                        Some("b") => json!(2.5),
                        _ => json!(10),
                    })
                }),
                OrderBy::new("weight")
            ],
        );
        assert_eq!(sources(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn order_by_descending_keeps_missing_last() {
        let out = run_single(
            &[],
            modules![
                text_docs(&["x", "y", "z"]),
                Execute::for_each(|doc, _| {
                    Ok(vec![match doc.source() {
                        Some("x") => doc.clone_with_items([item("Date", "2024-01-01")])?,
                        Some("z") => doc.clone_with_items([item("Date", "2024-03-01")])?,
                        _ => doc,
                    }])
                }),
                OrderBy::new("Date").descending()
            ],
        );
        assert_eq!(sources(&out), vec!["z", "x", "y"]);
    }

    #[test]
    fn order_by_is_stable() {
        let out = run_single(
            &[],
            modules![
                text_docs(&["first", "second", "third"]),
                Meta::new("Rank", 1),
                OrderBy::new("Rank")
            ],
        );
        assert_eq!(sources(&out), vec!["first", "second", "third"]);
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("10"), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(9), &json!("9")), Ordering::Equal);
        assert_eq!(compare_values(&json!(false), &json!(true)), Ordering::Less);
    }

    #[test]
    fn kinds_rank_before_values() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(true), &json!(-5)), Ordering::Less);
        assert_eq!(compare_values(&json!(1000), &json!("abc")), Ordering::Less);
        assert_eq!(compare_values(&json!("zzz"), &json!([1])), Ordering::Less);
    }

    #[test]
    fn mixed_input_sorts_consistently() {
        // Small LCG so the input is varied but reproducible.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            state >> 33
        };

        for _ in 0..200 {
            let mut values: Vec<Value> = (0..200)
                .map(|_| {
                    let n = next() % 50;
                    match next() % 7 {
                        0 => json!(n),
                        1 => json!(n as f64 + 0.5),
                        2 => json!(n.to_string()),
                        3 => json!(format!("title {n}")),
                        4 => json!(n % 2 == 0),
                        5 => json!(null),
                        _ => json!([n]),
                    }
                })
                .collect();

            values.sort_by(compare_values);
            assert!(
                values
                    .windows(2)
                    .all(|w| compare_values(&w[0], &w[1]) != Ordering::Greater)
            );
        }
    }

    #[test]
    fn order_by_interleaves_numbers_and_numeric_strings() {
        let out = run_single(
            &[],
            modules![
                text_docs(&["c", "a", "d", "b"]),
                Meta::for_each("Order", |doc, _| {
                    Ok(match doc.source() {
                        Some("a") => json!(3),
                        Some("b") => json!("4"),
                        Some("c") => json!(10),
                        _ => json!("12"),
                    })
                }),
                OrderBy::new("order")
            ],
        );
        assert_eq!(sources(&out), vec!["a", "b", "c", "d"]);
    }
}
