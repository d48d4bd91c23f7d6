// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rendering of spec tree values into label strings
//!
//! Every function here is total: a missing or oddly shaped value renders as
//! something (usually the empty string), never as an error.

use serde_json::Value;
use std::time::Duration;

use super::schema::PairStyle;

/// Resolve a dotted path (`connectionPool.tcp.maxConnections`) below `value`.
/// The empty path is `value` itself. `null` counts as absent.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    if !path.is_empty() {
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
    }
    if current.is_null() { None } else { Some(current) }
}

/// Render a scalar leaf: strings verbatim, numbers in decimal, bools as `true`/`false`
pub fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        // Not a scalar in any schema we know; keep the information anyway
        Some(other) => other.to_string(),
    }
}

/// Render a list of scalars as one comma-separated value
pub fn join(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| scalar(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        other => scalar(other),
    }
}

/// Render a map as one bracketed literal per pair, in key order
pub fn pairs(value: Option<&Value>, style: PairStyle) -> String {
    let Some(Value::Object(map)) = value else {
        return String::new();
    };

    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    entries
        .into_iter()
        .map(|(key, value)| match style {
            PairStyle::KeyValue => format!("{{key:{},value:{}}}", key, scalar(Some(value))),
            PairStyle::HeaderMatch => format!(
                "{{header:{},value:{},{},{}}}",
                key,
                scalar(lookup(value, "exact")),
                scalar(lookup(value, "prefix")),
                scalar(lookup(value, "regex")),
            ),
        })
        .collect()
}

/// Render a duration leaf in seconds (`"90s"`, `"0.5s"`)
///
/// Accepts Go-style strings (`"1m30s"`, `"500ms"`), protobuf JSON strings
/// (`"1.500s"`), bare numbers (seconds) and `{seconds, nanos}` objects.
/// Strings that cannot be parsed are passed through unchanged.
pub fn duration(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => match parse_duration(s) {
            Some(d) => format_seconds(d),
            None => s.clone(),
        },
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(seconds_to_duration)
            .map(format_seconds)
            .unwrap_or_else(|| n.to_string()),
        Some(obj @ Value::Object(_)) => {
            let secs = lookup(obj, "seconds").map(number_of).unwrap_or(0.0);
            let nanos = lookup(obj, "nanos").map(number_of).unwrap_or(0.0);
            seconds_to_duration(secs + nanos / 1e9)
                .map(format_seconds)
                .unwrap_or_else(|| obj.to_string())
        }
        Some(other) => scalar(Some(other)),
    }
}

/// Numeric value of a JSON number or numeric string (protobuf int64 is a string)
fn number_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// `None` for negative, non-finite or out of range values
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Parse a duration string in Go or protobuf JSON form
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(d) = humantime::parse_duration(s) {
        return Some(d);
    }
    // Protobuf JSON form: decimal seconds with an `s` suffix
    s.strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .and_then(seconds_to_duration)
}

/// Seconds with the shortest exact decimal fraction and an `s` suffix
pub fn format_seconds(d: Duration) -> String {
    let secs = d.as_secs();
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        return format!("{}s", secs);
    }
    let fraction = format!("{:09}", nanos);
    format!("{}.{}s", secs, fraction.trim_end_matches('0'))
}
