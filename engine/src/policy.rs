//! Per-call sync policy.

use crate::{error::Result, Error, Timestamp};
use serde::{Deserialize, Serialize};

/// How the raw sidecar column is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawFormat {
    /// JSON projection of the decoded tree
    #[default]
    Json,
    /// The sidecar text exactly as read from the device
    Verbatim,
}

/// Switches that govern one reconcile call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncPolicy {
    /// Leave books the library already marks as finished untouched
    pub skip_if_finished: bool,
    /// Skip sidecars not modified since the last recorded sync
    pub skip_if_not_newer: bool,
    /// Build sidecars for books that have none on the device
    pub push_missing: bool,
    /// Compute writes without applying them to the library
    pub dry_run: bool,
    /// Drop writes equal to the value already in the library
    pub only_changed: bool,
    pub raw_format: RawFormat,
    /// Timestamp written to the sync-date column. Left unset, no sync date
    /// is written.
    pub synced_at: Option<Timestamp>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            skip_if_finished: false,
            skip_if_not_newer: false,
            push_missing: false,
            dry_run: false,
            only_changed: true,
            raw_format: RawFormat::Json,
            synced_at: None,
        }
    }
}

impl SyncPolicy {
    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}
