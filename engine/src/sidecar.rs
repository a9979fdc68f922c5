//! The normalized per-book record built from a decoded sidecar.
//!
//! Building never fails. Sidecars come from many firmware versions, so a
//! missing or oddly typed field is simply absent from the record.

use crate::annotation::{normalize, AnnotationRecord};
use crate::decode::decode;
use crate::error::DecodeError;
use crate::value::Value;
use crate::Timestamp;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Reading status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingStatus {
    Finished,
    Reading,
    OnHold,
    #[default]
    Unknown,
}

impl ReadingStatus {
    /// Map free text to a status. Total: unrecognized text is `Unknown`.
    ///
    /// Whole-text matches win. Otherwise the first status with a keyword
    /// starting a word of the text is taken, checked in the order finished,
    /// on hold, reading, so "Completed reading" is finished.
    pub fn parse(text: &str) -> Self {
        let normalized = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "complete" | "completed" | "finished" | "done" | "read" => {
                return ReadingStatus::Finished
            }
            "reading" | "in progress" | "started" => return ReadingStatus::Reading,
            "abandoned" | "on hold" | "paused" => return ReadingStatus::OnHold,
            _ => {}
        }

        const KEYWORDS: &[(ReadingStatus, &[&str])] = &[
            (ReadingStatus::Finished, &["complete", "finished"]),
            (ReadingStatus::OnHold, &["abandon", "on hold", "paused"]),
            (ReadingStatus::Reading, &["reading", "in progress"]),
        ];
        KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| starts_a_word(&normalized, w)))
            .map_or(ReadingStatus::Unknown, |(status, _)| *status)
    }

    /// Label as the device writes it. `Unknown` has none.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            ReadingStatus::Finished => Some("complete"),
            ReadingStatus::Reading => Some("reading"),
            ReadingStatus::OnHold => Some("abandoned"),
            ReadingStatus::Unknown => None,
        }
    }
}

/// Whether `needle` occurs in `text` at the start of a word.
fn starts_a_word(text: &str, needle: &str) -> bool {
    text.match_indices(needle)
        .any(|(i, _)| i == 0 || text.as_bytes()[i - 1] == b' ')
}

/// Synchronizable facts about one book on the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRecord {
    /// Fraction read, within [0, 1]
    pub percent_finished: Option<f64>,
    pub status: ReadingStatus,
    /// When the status was last changed on the device
    pub status_modified: Option<NaiveDate>,
    /// Star rating, 0 to 5
    pub rating: Option<i64>,
    pub review: Option<String>,
    /// Partial content hash the device uses for sync-server lookups
    pub md5: Option<String>,
    /// Last reading position (xpointer)
    pub last_location: Option<String>,
    pub pages: Option<i64>,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub annotations: Vec<AnnotationRecord>,
    /// Annotation leaves the normalizer could not read
    pub annotations_skipped: usize,
    /// Modification time of the sidecar file, supplied by the caller
    pub last_modified: Option<Timestamp>,
    pub raw: Value,
}

impl SidecarRecord {
    /// Build the record from a decoded sidecar.
    pub fn build(tree: Value, last_modified: Option<Timestamp>) -> Self {
        let normalized = normalize(&tree);
        let text = |path: &[&str]| {
            tree.path(path)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            percent_finished: tree
                .get("percent_finished")
                .and_then(Value::as_f64)
                .filter(|p| (0.0..=1.0).contains(p)),
            status: text(&["summary", "status"])
                .map(|s| ReadingStatus::parse(&s))
                .unwrap_or_default(),
            status_modified: text(&["summary", "modified"])
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            rating: tree
                .path(&["summary", "rating"])
                .and_then(Value::as_i64)
                .filter(|r| (0..=5).contains(r)),
            review: text(&["summary", "note"]),
            md5: text(&["partial_md5_checksum"]),
            last_location: text(&["last_xpointer"]),
            pages: tree
                .get("doc_pages")
                .or_else(|| tree.path(&["stats", "pages"]))
                .and_then(Value::as_i64)
                .filter(|p| *p > 0),
            title: text(&["doc_props", "title"]),
            authors: text(&["doc_props", "authors"]),
            annotations: normalized.annotations,
            annotations_skipped: normalized.skipped,
            last_modified,
            raw: tree,
        }
    }

    /// Decode sidecar text and build the record.
    pub fn parse(text: &str, last_modified: Option<Timestamp>) -> Result<Self, DecodeError> {
        decode(text).map(|tree| Self::build(tree, last_modified))
    }

    pub fn is_finished(&self) -> bool {
        self.status == ReadingStatus::Finished
    }
}
