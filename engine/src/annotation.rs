//! Highlights and bookmarks.
//!
//! Sidecars store annotations in one of two shapes depending on the firmware
//! generation that wrote them:
//!
//! - current: a flat `annotations` list of leaf tables;
//! - legacy: `highlight`, keyed by page then by index, plus a flat
//!   `bookmarks` list that repeats most highlights with the user note.
//!
//! [`normalize`] accepts either (or a bare container of leaves) and returns
//! one canonical list: duplicates folded, ordered by datetime with undated
//! entries last, ties kept in encounter order.

use crate::encode::encode;
use crate::value::{Key, Value};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Format of annotation datetimes in sidecars.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LEAF_KEYS: &[&str] = &[
    "datetime", "chapter", "text", "note", "notes", "pos0", "pos1", "page", "pageno", "drawer",
    "color",
];

/// Whether an annotation marks a passage or only a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Bookmark,
}

impl std::fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationKind::Highlight => write!(f, "highlight"),
            AnnotationKind::Bookmark => write!(f, "bookmark"),
        }
    }
}

/// One highlight or bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub kind: AnnotationKind,
    /// `None` when missing or not in `YYYY-MM-DD HH:MM:SS` form
    pub datetime: Option<NaiveDateTime>,
    pub chapter: Option<String>,
    /// The highlighted passage
    pub text: Option<String>,
    /// The user's note
    pub note: Option<String>,
    /// Start anchor (xpointer string, or a position table for paged documents)
    pub pos0: Option<Value>,
    /// End anchor
    pub pos1: Option<Value>,
    /// Page or xpointer of a bookmark
    pub page: Option<Value>,
    pub pageno: Option<i64>,
    pub drawer: Option<String>,
    pub color: Option<String>,
}

impl AnnotationRecord {
    /// Read a leaf table. Returns `None` when it has no recognizable field.
    pub fn from_leaf(leaf: &Value) -> Option<Self> {
        if !matches!(leaf, Value::Map(_)) || !LEAF_KEYS.iter().any(|k| leaf.get(*k).is_some()) {
            return None;
        }

        let text_field = non_empty(leaf.get("text"));
        // Legacy bookmark entries keep the passage in `notes` and the user
        // note in `text`.
        let (text, note) = match non_empty(leaf.get("notes")) {
            Some(passage) => {
                let note = non_empty(leaf.get("note"))
                    .or_else(|| text_field.filter(|t| *t != passage));
                (Some(passage), note)
            }
            None => (text_field, non_empty(leaf.get("note"))),
        };

        let pos0 = leaf.get("pos0").filter(|v| !v.is_nil()).cloned();
        let pos1 = leaf.get("pos1").filter(|v| !v.is_nil()).cloned();
        let kind = if pos0.is_some() || pos1.is_some() {
            AnnotationKind::Highlight
        } else {
            AnnotationKind::Bookmark
        };

        Some(Self {
            kind,
            datetime: leaf
                .get("datetime")
                .and_then(Value::as_str)
                .and_then(parse_datetime),
            chapter: non_empty(leaf.get("chapter")),
            text,
            note,
            pos0,
            pos1,
            page: leaf
                .get("page")
                .filter(|v| matches!(v, Value::Str(_) | Value::Int(_) | Value::Float(_)))
                .cloned(),
            pageno: leaf.get("pageno").and_then(Value::as_i64),
            drawer: non_empty(leaf.get("drawer")),
            color: non_empty(leaf.get("color")),
        })
    }

    /// Write back as a current-generation leaf table.
    pub fn to_leaf(&self) -> Value {
        let text = |s: &Option<String>| s.clone().map(Value::Str).unwrap_or_default();
        Value::table([
            (
                "datetime",
                self.datetime
                    .map(|dt| Value::Str(dt.format(DATETIME_FORMAT).to_string()))
                    .unwrap_or_default(),
            ),
            ("chapter", text(&self.chapter)),
            ("text", text(&self.text)),
            ("note", text(&self.note)),
            ("pos0", self.pos0.clone().unwrap_or_default()),
            ("pos1", self.pos1.clone().unwrap_or_default()),
            ("page", self.page.clone().unwrap_or_default()),
            ("pageno", self.pageno.map(Value::Int).unwrap_or_default()),
            ("drawer", text(&self.drawer)),
            ("color", text(&self.color)),
        ])
    }

    pub fn has_note(&self) -> bool {
        self.note.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    /// Identity for deduplication: start anchor (falling back to the page of
    /// a bare bookmark), end anchor and datetime. Entries with none of these
    /// have no identity and are never folded.
    fn identity(&self) -> Option<(Option<String>, Option<String>, Option<NaiveDateTime>)> {
        let start = self.pos0.as_ref().or(self.page.as_ref()).map(encode);
        let end = self.pos1.as_ref().map(encode);
        if start.is_none() && end.is_none() && self.datetime.is_none() {
            return None;
        }
        Some((start, end, self.datetime))
    }

    /// Fill fields this record lacks from a duplicate of it.
    fn fill_from(&mut self, other: AnnotationRecord) {
        self.chapter = self.chapter.take().or(other.chapter);
        self.text = self.text.take().or(other.text);
        self.note = self.note.take().or(other.note);
        self.pos0 = self.pos0.take().or(other.pos0);
        self.pos1 = self.pos1.take().or(other.pos1);
        self.page = self.page.take().or(other.page);
        self.pageno = self.pageno.or(other.pageno);
        self.drawer = self.drawer.take().or(other.drawer);
        self.color = self.color.take().or(other.color);
        if self.pos0.is_some() || self.pos1.is_some() {
            self.kind = AnnotationKind::Highlight;
        }
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Parse a sidecar datetime (`YYYY-MM-DD HH:MM:SS`).
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT).ok()
}

/// Result of normalizing a tree's annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeOutcome {
    pub annotations: Vec<AnnotationRecord>,
    /// Leaves dropped because they had no recognizable field
    pub skipped: usize,
    /// Entries folded into an earlier duplicate
    pub merged: usize,
}

impl NormalizeOutcome {
    /// Annotation containers were present but nothing usable came out.
    pub fn is_suspicious(&self) -> bool {
        self.annotations.is_empty() && self.skipped > 0
    }
}

/// Normalize the annotations of a sidecar root, or of a bare container of
/// annotation leaves.
pub fn normalize(tree: &Value) -> NormalizeOutcome {
    let mut collector = Collector::default();

    if let Some(current) = tree.get("annotations") {
        collector.collect(current);
    } else if tree.get("highlight").is_some() || tree.get("bookmarks").is_some() {
        if let Some(highlight) = tree.get("highlight") {
            collector.collect(highlight);
        }
        if let Some(bookmarks) = tree.get("bookmarks") {
            collector.collect(bookmarks);
        }
    } else if is_container(tree) {
        collector.collect(tree);
    }

    collector.finish()
}

/// Canonical list written back as a sequence of leaf tables.
pub fn to_tree(annotations: &[AnnotationRecord]) -> Value {
    Value::sequence(annotations.iter().map(AnnotationRecord::to_leaf))
}

/// A table with integer keys only: a list of leaves or of pages.
fn is_container(value: &Value) -> bool {
    match value {
        Value::Sequence(_) => true,
        Value::Map(map) => map.keys().all(|k| matches!(k, Key::Int(_))),
        _ => false,
    }
}

#[derive(Default)]
struct Collector {
    records: Vec<AnnotationRecord>,
    seen: HashMap<(Option<String>, Option<String>, Option<NaiveDateTime>), usize>,
    skipped: usize,
    merged: usize,
}

impl Collector {
    fn collect(&mut self, container: &Value) {
        if !is_container(container) {
            self.skipped += 1;
            return;
        }
        for (_, child) in container.entries() {
            if matches!(child, Value::Map(map) if map.keys().any(|k| matches!(k, Key::Str(_)))) {
                self.leaf(child);
            } else if is_container(child) {
                // page -> index -> leaf
                for (_, leaf) in child.entries() {
                    self.leaf(leaf);
                }
            } else {
                self.skipped += 1;
            }
        }
    }

    fn leaf(&mut self, leaf: &Value) {
        let Some(record) = AnnotationRecord::from_leaf(leaf) else {
            self.skipped += 1;
            return;
        };

        let Some(identity) = record.identity() else {
            self.records.push(record);
            return;
        };

        match self.seen.get(&identity) {
            Some(&slot) => {
                self.merged += 1;
                let existing = &mut self.records[slot];
                if !existing.has_note() && record.has_note() {
                    let previous = std::mem::replace(existing, record);
                    existing.fill_from(previous);
                } else {
                    existing.fill_from(record);
                }
            }
            None => {
                self.seen.insert(identity, self.records.len());
                self.records.push(record);
            }
        }
    }

    fn finish(self) -> NormalizeOutcome {
        let mut annotations = self.records;
        // stable: equal datetimes keep encounter order
        annotations.sort_by(|a, b| match (a.datetime, b.datetime) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        NormalizeOutcome {
            annotations,
            skipped: self.skipped,
            merged: self.merged,
        }
    }
}
