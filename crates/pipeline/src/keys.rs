//! Deterministic encoding of value tuples into storage keys.
//!
//! Operator state is keyed by partition values and primary-key tuples.
//! The encoding is injective: identical tuples produce identical keys
//! (that is the dedup mechanism) and distinct tuples never collide.
//! Every component is tagged and length-prefixed, so concatenating
//! encodings remains unambiguous.

use alloc::string::String;
use core::fmt::Write;
use tidemark_core::Value;

/// Encodes an ordered tuple of values as a storage key.
pub fn encode_values(values: &[&Value]) -> String {
    let mut out = String::new();
    for value in values {
        encode_into(value, &mut out);
    }
    out
}

/// Encodes a single value as a storage key component.
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(false) => out.push_str("b0"),
        Value::Bool(true) => out.push_str("b1"),
        Value::Int64(v) => {
            let _ = write!(out, "i{};", v);
        }
        Value::Float64(v) => {
            let _ = write!(out, "f{:016x};", v.to_bits());
        }
        Value::String(v) => {
            let _ = write!(out, "s{}:", v.len());
            out.push_str(v);
        }
        Value::Array(items) => {
            let _ = write!(out, "a{}:", items.len());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Object(entries) => {
            let _ = write!(out, "o{}:", entries.len());
            for (key, item) in entries {
                let _ = write!(out, "s{}:", key.len());
                out.push_str(key);
                encode_into(item, out);
            }
        }
    }
}

/// Encodes a row's values for the given columns, in column order.
///
/// Missing columns encode as Null so the tuple length is stable.
pub fn encode_row_key(row: &tidemark_core::Row, columns: &[String]) -> String {
    let null = Value::Null;
    let mut out = String::new();
    for column in columns {
        encode_into(row.get(column).unwrap_or(&null), &mut out);
    }
    out
}
