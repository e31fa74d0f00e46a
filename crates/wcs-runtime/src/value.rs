#![forbid(unsafe_code)]

//! Reading and writing paths inside a JSON state bag.
//!
//! A path's wildcards are filled from a list index chain (outermost first)
//! to produce concrete [`Step`]s; other segments address object keys, or
//! array slots when they parse as numbers.

use std::borrow::Cow;

use serde_json::{Map, Value};
use wcs_core::PathInfo;
use wcs_core::path::WILDCARD;

/// One concrete step of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<'a> {
    Key(Cow<'a, str>),
    Index(usize),
}

/// Fill `info`'s wildcards with `indexes`. `None` if there are too few.
#[must_use]
pub fn concrete_steps<'a>(info: &'a PathInfo, indexes: &[usize]) -> Option<Vec<Step<'a>>> {
    let mut next = indexes.iter();
    info.segments()
        .iter()
        .map(|seg| {
            if &**seg == WILDCARD {
                next.next().map(|&i| Step::Index(i))
            } else {
                Some(Step::Key(Cow::Borrowed(&**seg)))
            }
        })
        .collect()
}

fn child<'v>(value: &'v Value, step: &Step<'_>) -> Option<&'v Value> {
    match (value, step) {
        (Value::Object(map), Step::Key(k)) => map.get(&**k),
        (Value::Array(items), Step::Index(i)) => items.get(*i),
        (Value::Array(items), Step::Key(k)) => items.get(k.parse::<usize>().ok()?),
        (Value::Object(map), Step::Index(i)) => map.get(&i.to_string()),
        _ => None,
    }
}

/// Value at `steps` under `root`.
#[must_use]
pub fn get_at<'v>(root: &'v Value, steps: &[Step<'_>]) -> Option<&'v Value> {
    steps.iter().try_fold(root, |v, step| child(v, step))
}

/// Why a write could not be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// A step crossed a scalar, or an array slot past the end.
    NotAContainer,
}

/// Write `value` at `steps`, creating missing objects on the way.
///
/// An array slot equal to the length appends; anything beyond fails.
pub fn set_at(root: &mut Value, steps: &[Step<'_>], value: Value) -> Result<(), WriteError> {
    let Some((last, init)) = steps.split_last() else {
        *root = value;
        return Ok(());
    };
    let mut current = root;
    for step in init {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = slot_mut(current, step, true)?;
    }
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    *slot_mut(current, last, false)? = value;
    Ok(())
}

fn slot_mut<'v>(
    value: &'v mut Value,
    step: &Step<'_>,
    vivify: bool,
) -> Result<&'v mut Value, WriteError> {
    let index = |step: &Step<'_>| match step {
        Step::Index(i) => Some(*i),
        Step::Key(k) => k.parse::<usize>().ok(),
    };
    match value {
        Value::Object(map) => {
            let key = match step {
                Step::Key(k) => k.clone().into_owned(),
                Step::Index(i) => i.to_string(),
            };
            let entry = map.entry(key).or_insert(Value::Null);
            if vivify && entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            Ok(entry)
        }
        Value::Array(items) => {
            let i = index(step).ok_or(WriteError::NotAContainer)?;
            if i == items.len() {
                items.push(if vivify {
                    Value::Object(Map::new())
                } else {
                    Value::Null
                });
            }
            items.get_mut(i).ok_or(WriteError::NotAContainer)
        }
        _ => Err(WriteError::NotAContainer),
    }
}

/// Text shown for a value in a text node or attribute.
///
/// `null` renders empty, strings render bare, containers render as JSON.
#[must_use]
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// JavaScript-style truthiness used by conditional bindings.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
