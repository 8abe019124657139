//! Dot/bracket JSON path expressions: parsing, evaluation and assignment.
//!
//! A path is a sequence of segments separated by `.`; brackets (`[n]`) are
//! accepted and flattened into the same segment stream, and a leading `$.`
//! root marker is stripped. A segment that parses as a decimal integer
//! addresses an array index; any other segment addresses an object key.

use serde_json::Value;
use std::fmt;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Addresses an object key.
    Key(String),
    /// Addresses an array index.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A parsed path expression, ready for repeated evaluation or assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    raw: String,
    segments: Vec<PathSegment>,
}

impl Path {
    /// Parses a path expression.
    ///
    /// Strips an optional leading `$.`, then splits on any of `.`, `[`, `]`,
    /// discarding empty segments produced by adjacent delimiters. A segment
    /// that is a valid decimal integer is treated as [`PathSegment::Index`];
    /// everything else becomes [`PathSegment::Key`].
    ///
    /// `[-1]` is treated as the object key `"-1"`, not "last element" — see
    /// DESIGN.md for the rationale (spec.md §9 Open Question).
    pub fn parse(expr: &str) -> Path {
        let raw = expr.to_string();
        let stripped = expr.strip_prefix("$.").unwrap_or(expr);

        let mut segments = Vec::new();
        let mut current = String::new();
        for ch in stripped.chars() {
            match ch {
                '.' | '[' | ']' => {
                    if !current.is_empty() {
                        segments.push(Self::classify(&current));
                        current.clear();
                    }
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            segments.push(Self::classify(&current));
        }

        Path { raw, segments }
    }

    fn classify(segment: &str) -> PathSegment {
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = segment.parse::<usize>() {
                return PathSegment::Index(n);
            }
        }
        PathSegment::Key(segment.to_string())
    }

    /// The original, unparsed expression (used in error messages).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed segment sequence.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Evaluates the path against `doc`, returning `None` ("not found") when
    /// any intermediate node is missing or null, distinct from a `Some(Value::Null)`
    /// result that genuinely resolves to JSON null... except that a path can
    /// never resolve *to* null and report found, because `spec.md` defines
    /// "not found" as the outcome whenever a step lands on a missing or null
    /// node. A leaf value of `null` is therefore reported as not found too.
    pub fn evaluate<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.segments {
            match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => match map.get(k) {
                    Some(v) if !v.is_null() => current = v,
                    _ => return None,
                },
                (PathSegment::Index(i), Value::Array(arr)) => match arr.get(*i) {
                    Some(v) if !v.is_null() => current = v,
                    _ => return None,
                },
                _ => return None,
            }
        }
        Some(current)
    }

    /// Assigns `value` at the path inside `doc`, materializing intermediate
    /// containers as needed. An absent intermediate segment becomes an array
    /// if the *next* segment is a decimal integer, otherwise an object. The
    /// final segment is always assigned, overwriting whatever was there.
    pub fn assign(&self, doc: &mut Value, value: Value) {
        if self.segments.is_empty() {
            *doc = value;
            return;
        }
        let mut current = doc;
        for window in self.segments.windows(2) {
            let seg = &window[0];
            let next = &window[1];
            current = step_into(current, seg, next);
        }
        assign_leaf(current, self.segments.last().unwrap(), value);
    }
}

fn step_into<'a>(node: &'a mut Value, seg: &PathSegment, next: &PathSegment) -> &'a mut Value {
    match seg {
        PathSegment::Key(k) => {
            if !matches!(node, Value::Object(_)) {
                *node = Value::Object(Default::default());
            }
            let map = node.as_object_mut().unwrap();
            map.entry(k.clone())
                .or_insert_with(|| default_container(next))
        }
        PathSegment::Index(i) => {
            if !matches!(node, Value::Array(_)) {
                *node = Value::Array(Vec::new());
            }
            let arr = node.as_array_mut().unwrap();
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            let slot = &mut arr[*i];
            if slot.is_null() {
                *slot = default_container(next);
            }
            slot
        }
    }
}

fn default_container(next: &PathSegment) -> Value {
    match next {
        PathSegment::Index(_) => Value::Array(Vec::new()),
        PathSegment::Key(_) => Value::Object(Default::default()),
    }
}

fn assign_leaf(node: &mut Value, seg: &PathSegment, value: Value) {
    match seg {
        PathSegment::Key(k) => {
            if !matches!(node, Value::Object(_)) {
                *node = Value::Object(Default::default());
            }
            node.as_object_mut().unwrap().insert(k.clone(), value);
        }
        PathSegment::Index(i) => {
            if !matches!(node, Value::Array(_)) {
                *node = Value::Array(Vec::new());
            }
            let arr = node.as_array_mut().unwrap();
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            arr[*i] = value;
        }
    }
}
