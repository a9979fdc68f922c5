//! Encoder producing Lua literals that [`decode`](crate::decode::decode)
//! reads back into the same tree.

use crate::value::{Key, Value};
use std::fmt::Write;

/// First line of every sidecar file written by the device.
pub const SIDECAR_HEADER: &str = "-- we can read Lua syntax here!";

const INDENT: &str = "    ";

/// Encode a value as a pretty-printed Lua literal.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    out
}

/// Encode a value as a complete sidecar file.
pub fn encode_sidecar(value: &Value) -> String {
    format!("{}\nreturn {}\n", SIDECAR_HEADER, encode(value))
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => write_float(out, *f),
        Value::Str(s) => write_string(out, s),
        Value::Sequence(items) => write_table(
            out,
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Int(i as i64 + 1), v)),
            depth,
        ),
        Value::Map(map) => write_table(out, map.iter().map(|(k, v)| (k.clone(), v)), depth),
    }
}

fn write_table<'v>(
    out: &mut String,
    entries: impl Iterator<Item = (Key, &'v Value)>,
    depth: usize,
) {
    let mut entries = entries.peekable();
    if entries.peek().is_none() {
        out.push_str("{}");
        return;
    }

    out.push_str("{\n");
    for (key, value) in entries {
        out.push_str(&INDENT.repeat(depth + 1));
        match key {
            Key::Int(i) => {
                let _ = write!(out, "[{}]", i);
            }
            Key::Str(s) => {
                out.push('[');
                write_string(out, &s);
                out.push(']');
            }
        }
        out.push_str(" = ");
        write_value(out, value, depth + 1);
        out.push_str(",\n");
    }
    out.push_str(&INDENT.repeat(depth));
    out.push('}');
}

fn write_float(out: &mut String, f: f64) {
    if !f.is_finite() {
        // No literal spells these; the key simply disappears on decode.
        out.push_str("nil");
        return;
    }
    // Debug keeps a fraction or exponent and round-trips exactly.
    let _ = write!(out, "{:?}", f);
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\{:03}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
