//! Value arithmetic for resources
//!
//! A resource value is a scalar, a set of ranges, or a set of strings.
//! Range values are kept sorted, merged and disjoint at all times;
//! adjacent ranges coalesce on addition ([1-4] + [5-8] = [1-8]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    /// Inclusive [begin, end] ranges.
    Ranges(Vec<(u64, u64)>),
    Set(BTreeSet<String>),
}

impl Value {
    /// Whether the two values are the same kind and can be combined.
    pub fn same_kind(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Scalar(_), Value::Scalar(_))
                | (Value::Ranges(_), Value::Ranges(_))
                | (Value::Set(_), Value::Set(_))
        )
    }

    /// A value is empty when it no longer represents any resource.
    pub fn is_empty(&self) -> bool {
        match self {
            // Scalars are compared with a small epsilon so that repeated
            // fractional arithmetic cannot leave residue entries behind.
            Value::Scalar(s) => *s < 1e-9,
            Value::Ranges(ranges) => ranges.is_empty(),
            Value::Set(set) => set.is_empty(),
        }
    }

    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a + b),
            (Value::Ranges(a), Value::Ranges(b)) => {
                let mut all = a.clone();
                all.extend(b.iter().copied());
                Value::Ranges(coalesce(all))
            }
            (Value::Set(a), Value::Set(b)) => Value::Set(a.union(b).cloned().collect()),
            _ => panic!("adding values of different kinds"),
        }
    }

    /// Subtraction clamps at empty: removing more than is present
    /// leaves nothing rather than a negative amount.
    pub fn subtract(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar((a - b).max(0.0)),
            (Value::Ranges(a), Value::Ranges(b)) => Value::Ranges(remove_ranges(a, b)),
            (Value::Set(a), Value::Set(b)) => Value::Set(a.difference(b).cloned().collect()),
            _ => panic!("subtracting values of different kinds"),
        }
    }

    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a + 1e-9 >= *b,
            (Value::Ranges(a), Value::Ranges(b)) => ranges_contain(a, b),
            (Value::Set(a), Value::Set(b)) => b.is_subset(a),
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Value::Scalar(s) => {
                if *s < 0.0 || !s.is_finite() {
                    return Err(format!("invalid scalar value {}", s));
                }
            }
            Value::Ranges(ranges) => {
                for (begin, end) in ranges {
                    if begin > end {
                        return Err(format!("invalid range [{}-{}]", begin, end));
                    }
                }
            }
            Value::Set(_) => {}
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Ranges(ranges) => {
                write!(f, "[")?;
                for (i, (begin, end)) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}-{}", begin, end)?;
                }
                write!(f, "]")
            }
            Value::Set(set) => {
                write!(f, "{{")?;
                for (i, item) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Sort and merge ranges; overlapping and adjacent ranges combine.
pub fn coalesce(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.retain(|(b, e)| b <= e);
    ranges.sort();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (begin, end) in ranges {
        match merged.last_mut() {
            // `begin <= last_end + 1` also merges adjacent ranges.
            Some((_, last_end)) if begin <= last_end.saturating_add(1) => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((begin, end)),
        }
    }
    merged
}

/// Remove every point of `remove` from `from`. Both inputs must be
/// coalesced; output is coalesced.
fn remove_ranges(from: &[(u64, u64)], remove: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut result = Vec::with_capacity(from.len());

    for &(begin, end) in from {
        let mut cursor = begin;
        let mut alive = true;

        for &(rb, re) in remove {
            if re < cursor || rb > end {
                continue;
            }
            if rb > cursor {
                result.push((cursor, rb - 1));
            }
            if re >= end {
                alive = false;
                break;
            }
            cursor = re + 1;
        }

        if alive && cursor <= end {
            result.push((cursor, end));
        }
    }

    result
}

fn ranges_contain(outer: &[(u64, u64)], inner: &[(u64, u64)]) -> bool {
    inner
        .iter()
        .all(|&(b, e)| outer.iter().any(|&(ob, oe)| ob <= b && e <= oe))
}

/// Parse a value in one of the three textual forms:
/// `[1-100, 200-300]` (ranges), `{a, b}` (set), `4.5` (scalar).
pub fn parse(text: &str) -> Result<Value, String> {
    let text = text.trim();

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let mut ranges = Vec::new();
        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (begin, end) = part
                .split_once('-')
                .ok_or_else(|| format!("expected 'begin-end' in range, got '{}'", part))?;
            let begin = begin
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("bad range begin '{}': {}", begin, e))?;
            let end = end
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("bad range end '{}': {}", end, e))?;
            ranges.push((begin, end));
        }
        return Ok(Value::Ranges(coalesce(ranges)));
    }

    if let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        let set = inner
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return Ok(Value::Set(set));
    }

    text.parse::<f64>()
        .map(Value::Scalar)
        .map_err(|e| format!("bad scalar '{}': {}", text, e))
}
