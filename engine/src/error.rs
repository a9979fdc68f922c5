//! Error types for the sidecar engine.

use crate::ColumnId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a sidecar literal could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum DecodeErrorKind {
    UnexpectedEnd,
    UnexpectedChar(char),
    InvalidEscape(String),
    InvalidNumber(String),
    UnsupportedKey(String),
    InvalidUtf8,
    TrailingInput,
    TooDeep,
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeErrorKind::UnexpectedEnd => write!(f, "unexpected end of input"),
            DecodeErrorKind::UnexpectedChar(c) => write!(f, "unexpected character {:?}", c),
            DecodeErrorKind::InvalidEscape(s) => write!(f, "invalid escape sequence \\{}", s),
            DecodeErrorKind::InvalidNumber(s) => write!(f, "invalid number literal {:?}", s),
            DecodeErrorKind::UnsupportedKey(s) => write!(f, "unsupported table key {}", s),
            DecodeErrorKind::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            DecodeErrorKind::TrailingInput => write!(f, "trailing input after literal"),
            DecodeErrorKind::TooDeep => write!(f, "tables nested too deeply"),
        }
    }
}

/// A malformed sidecar, with the 1-based position where decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind} at line {line}, column {column}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub line: usize,
    pub column: usize,
}

/// All possible errors from the sidecar engine.
///
/// Per-book and per-field errors end up in sync reports, so errors serialize
/// as `{"kind": .., "detail": ..}`.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // Per-field errors
    #[error("type mismatch for field '{field}' bound to '{column}': expected {expected}, got {got}")]
    FieldTypeMismatch {
        field: String,
        column: ColumnId,
        expected: String,
        got: String,
    },

    #[error("column '{column}' bound to field '{field}' has no declared kind")]
    UnknownColumn { field: String, column: ColumnId },

    #[error("no annotation could be read ({skipped} entries in an unknown shape)")]
    UnreadableAnnotations { skipped: usize },

    // Call-level errors
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
