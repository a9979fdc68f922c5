//! Reconciliation of device sidecars against library records.
//!
//! Books are processed one at a time, in batch order. Nothing that goes
//! wrong with a single book (a corrupt sidecar, a column of the wrong kind)
//! stops the batch: it is recorded in that book's result and in the summary.
//!
//! # Per-book flow
//!
//! 1. No library record: skipped
//! 2. No sidecar: push path, if enabled and a raw-metadata column is bound
//! 3. Decode the sidecar; failure is recorded and the book left untouched
//! 4. Policy gates: skip-if-finished, then skip-if-not-newer
//! 5. Derive, coerce and write every bound field

use crate::field::DeriveContext;
use crate::library::{reading_finished, recorded_sidecar_modified, ColumnWrite, LibrarySet};
use crate::push::{push, PushOutput};
use crate::schema::ColumnBindings;
use crate::sidecar::SidecarRecord;
use crate::{
    error::{DecodeError, Result},
    BookId, Error, Field, SyncPolicy, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A book found on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBook {
    /// Library uuid the device driver reports for the book
    pub uuid: BookId,
    /// Path of the book file on the device
    pub path: String,
    /// Sidecar text, when the device has one
    #[serde(default)]
    pub sidecar: Option<String>,
    /// Sidecar file modification time
    #[serde(default)]
    pub last_modified: Option<Timestamp>,
}

impl DeviceBook {
    pub fn new(uuid: impl Into<BookId>, path: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            path: path.into(),
            sidecar: None,
            last_modified: None,
        }
    }

    /// Builder-style method to attach sidecar text.
    pub fn with_sidecar(mut self, text: impl Into<String>) -> Self {
        self.sidecar = Some(text.into());
        self
    }

    /// Builder-style method to set the sidecar modification time.
    pub fn modified_at(mut self, at: Timestamp) -> Self {
        self.last_modified = Some(at);
        self
    }
}

/// Why a book was not synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The library already marks the book as finished
    AlreadyFinished,
    /// The sidecar has not changed since the last sync
    NotNewer,
    /// No sidecar on the device and pushing is not enabled
    NoSidecar,
    /// The device reports a uuid the library does not have
    NotInLibrary,
    /// Nothing in the library to build a sidecar from
    NoMetadata,
    /// Pushing is enabled but no raw-metadata column is bound
    PushUnconfigured,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyFinished => write!(f, "already finished in library"),
            SkipReason::NotNewer => write!(f, "sidecar not modified since last sync"),
            SkipReason::NoSidecar => write!(f, "no sidecar on device"),
            SkipReason::NotInLibrary => write!(f, "not in library"),
            SkipReason::NoMetadata => write!(f, "no metadata to push"),
            SkipReason::PushUnconfigured => write!(f, "no raw sidecar column to push from"),
        }
    }
}

/// What happened to one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "detail")]
pub enum BookOutcome {
    /// Bound fields were derived and written
    Applied,
    /// A policy gate stopped the book before any write
    PolicySkipped(SkipReason),
    /// The sidecar could not be decoded
    DecodeFailed(DecodeError),
    /// A sidecar was synthesized for the device
    Pushed(PushOutput),
    Skipped(SkipReason),
}

impl BookOutcome {
    /// Short reason for diagnostics.
    fn reason(&self) -> Option<String> {
        match self {
            BookOutcome::Applied | BookOutcome::Pushed(_) => None,
            BookOutcome::PolicySkipped(reason) | BookOutcome::Skipped(reason) => {
                Some(reason.to_string())
            }
            BookOutcome::DecodeFailed(e) => Some(format!("sidecar unreadable: {}", e)),
        }
    }
}

/// Result for one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookResult {
    pub uuid: BookId,
    pub outcome: BookOutcome,
    /// Column writes, applied to the library unless the policy is a dry run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<ColumnWrite>,
    /// Fields that could not be written; the other fields were
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<Error>,
    /// Annotation entries dropped because their shape was not recognized
    #[serde(default, skip_serializing_if = "is_zero")]
    pub annotations_skipped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl BookResult {
    fn new(uuid: &str, outcome: BookOutcome) -> Self {
        Self {
            uuid: uuid.to_string(),
            outcome,
            writes: Vec::new(),
            field_errors: Vec::new(),
            annotations_skipped: 0,
        }
    }
}

/// A book that was not fully applied, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub book: BookId,
    pub reason: String,
}

/// Batch totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub applied: usize,
    pub skipped: usize,
    pub decode_failed: usize,
    pub pushed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl SyncSummary {
    /// Books counted in the summary.
    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.decode_failed + self.pushed
    }
}

/// Everything a reconcile call produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub results: Vec<BookResult>,
    pub summary: SyncSummary,
    /// The batch was stopped before its end
    #[serde(default)]
    pub cancelled: bool,
}

impl SyncReport {
    /// Push outputs to write to the device.
    pub fn pushes(&self) -> impl Iterator<Item = &PushOutput> {
        self.results.iter().filter_map(|r| match &r.outcome {
            BookOutcome::Pushed(output) => Some(output),
            _ => None,
        })
    }

    pub fn result(&self, uuid: &str) -> Option<&BookResult> {
        self.results.iter().find(|r| r.uuid == uuid)
    }
}

/// Processes device books one at a time and accumulates the report.
pub struct Reconciler<'a, B: ColumnBindings + ?Sized> {
    policy: &'a SyncPolicy,
    bindings: &'a B,
    report: SyncReport,
}

impl<'a, B: ColumnBindings + ?Sized> Reconciler<'a, B> {
    /// Create a new reconciler.
    pub fn new(policy: &'a SyncPolicy, bindings: &'a B) -> Self {
        Self {
            policy,
            bindings,
            report: SyncReport::default(),
        }
    }

    /// Process one book, updating `library` unless the policy is a dry run.
    pub fn process(&mut self, book: &DeviceBook, library: &mut LibrarySet) -> &BookResult {
        let result = self.sync_book(book, library);
        self.record(result)
    }

    /// Finish and return the report.
    pub fn finish(self) -> SyncReport {
        let summary = &self.report.summary;
        info!(
            applied = summary.applied,
            skipped = summary.skipped,
            decode_failed = summary.decode_failed,
            pushed = summary.pushed,
            "sync finished"
        );
        self.report
    }

    fn sync_book(&self, book: &DeviceBook, library: &mut LibrarySet) -> BookResult {
        let uuid = book.uuid.as_str();

        let Some(record) = library.get(uuid) else {
            debug!(book = %uuid, "not in library");
            return BookResult::new(uuid, BookOutcome::Skipped(SkipReason::NotInLibrary));
        };

        let Some(text) = book.sidecar.as_deref() else {
            return self.push_book(book, library);
        };

        let sidecar = match SidecarRecord::parse(text, book.last_modified) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                warn!(book = %uuid, error = %e, "could not decode sidecar");
                return BookResult::new(uuid, BookOutcome::DecodeFailed(e));
            }
        };

        if self.policy.skip_if_finished && reading_finished(record, self.bindings) {
            debug!(book = %uuid, "already finished");
            return BookResult::new(uuid, BookOutcome::PolicySkipped(SkipReason::AlreadyFinished));
        }

        if self.policy.skip_if_not_newer {
            let previous = recorded_sidecar_modified(record, self.bindings);
            if let (Some(current), Some(previous)) = (sidecar.last_modified, previous) {
                if current <= previous {
                    debug!(book = %uuid, %current, %previous, "sidecar not newer");
                    return BookResult::new(uuid, BookOutcome::PolicySkipped(SkipReason::NotNewer));
                }
            }
        }

        let ctx = DeriveContext {
            raw_format: self.policy.raw_format,
            raw_text: Some(text),
            synced_at: self.policy.synced_at,
        };

        let mut result = BookResult::new(uuid, BookOutcome::Applied);
        for field in Field::ALL {
            let binding = match self.bindings.binding(field) {
                Ok(Some(binding)) => binding,
                Ok(None) => continue,
                Err(e) => {
                    result.field_errors.push(e);
                    continue;
                }
            };
            let Some(value) = field.derive(&sidecar, &ctx) else {
                continue;
            };
            match binding.coerce(field, value) {
                Ok(value) => {
                    if self.policy.only_changed && record.get(&binding.column) == Some(&value) {
                        continue;
                    }
                    result.writes.push(ColumnWrite::new(binding.column, value));
                }
                Err(e) => {
                    warn!(book = %uuid, field = %field, error = %e, "field not written");
                    result.field_errors.push(e);
                }
            }
        }

        result.annotations_skipped = sidecar.annotations_skipped;
        if sidecar.annotations.is_empty() && sidecar.annotations_skipped > 0 {
            warn!(
                book = %uuid,
                skipped = sidecar.annotations_skipped,
                "no annotation in the sidecar could be read"
            );
            result.field_errors.push(Error::UnreadableAnnotations {
                skipped: sidecar.annotations_skipped,
            });
        }

        if self.policy.dry_run {
            info!(book = %uuid, writes = result.writes.len(), "dry run, library not updated");
        } else {
            match library.apply(uuid, &result.writes) {
                Ok(changed) => info!(book = %uuid, changed, "updated library"),
                Err(e) => result.field_errors.push(e),
            }
        }

        result
    }

    fn push_book(&self, book: &DeviceBook, library: &LibrarySet) -> BookResult {
        let uuid = book.uuid.as_str();

        if !self.policy.push_missing {
            return BookResult::new(uuid, BookOutcome::Skipped(SkipReason::NoSidecar));
        }
        if self.bindings.column_for(Field::RawSidecar).is_none() {
            return BookResult::new(uuid, BookOutcome::Skipped(SkipReason::PushUnconfigured));
        }
        let Some(record) = library.get(uuid) else {
            return BookResult::new(uuid, BookOutcome::Skipped(SkipReason::NotInLibrary));
        };

        let attempt = push(&book.path, record, self.bindings);
        let outcome = match attempt.output {
            Some(output) => {
                info!(book = %uuid, path = %output.sidecar_path, "sidecar ready to push");
                BookOutcome::Pushed(output)
            }
            None => {
                debug!(book = %uuid, "no metadata to push");
                BookOutcome::Skipped(SkipReason::NoMetadata)
            }
        };
        let mut result = BookResult::new(uuid, outcome);
        result.field_errors = attempt.field_errors;
        result
    }

    fn record(&mut self, result: BookResult) -> &BookResult {
        let summary = &mut self.report.summary;
        match result.outcome {
            BookOutcome::Applied => summary.applied += 1,
            BookOutcome::PolicySkipped(_) | BookOutcome::Skipped(_) => summary.skipped += 1,
            BookOutcome::DecodeFailed(_) => summary.decode_failed += 1,
            BookOutcome::Pushed(_) => summary.pushed += 1,
        }

        if let Some(reason) = result.outcome.reason() {
            summary.diagnostics.push(Diagnostic {
                book: result.uuid.clone(),
                reason,
            });
        }
        for error in &result.field_errors {
            summary.diagnostics.push(Diagnostic {
                book: result.uuid.clone(),
                reason: error.to_string(),
            });
        }

        self.report.results.push(result);
        let last = self.report.results.len() - 1;
        &self.report.results[last]
    }
}

/// Reconcile a whole batch.
///
/// Fails only when the batch itself is malformed (empty or duplicate uuids),
/// before any book is touched.
pub fn reconcile<B>(
    batch: &[DeviceBook],
    library: &mut LibrarySet,
    policy: &SyncPolicy,
    bindings: &B,
) -> Result<SyncReport>
where
    B: ColumnBindings + ?Sized,
{
    reconcile_until(batch, library, policy, bindings, |_| true)
}

/// Reconcile a batch, asking `keep_going` before each book.
///
/// Returning `false` stops the batch. Books already processed keep their
/// results and library writes.
pub fn reconcile_until<B, F>(
    batch: &[DeviceBook],
    library: &mut LibrarySet,
    policy: &SyncPolicy,
    bindings: &B,
    mut keep_going: F,
) -> Result<SyncReport>
where
    B: ColumnBindings + ?Sized,
    F: FnMut(&DeviceBook) -> bool,
{
    validate_batch(batch)?;

    let mut reconciler = Reconciler::new(policy, bindings);
    let mut cancelled = false;
    for book in batch {
        if !keep_going(book) {
            info!(book = %book.uuid, "sync cancelled");
            cancelled = true;
            break;
        }
        reconciler.process(book, library);
    }

    let mut report = reconciler.finish();
    report.cancelled = cancelled;
    Ok(report)
}

fn validate_batch(batch: &[DeviceBook]) -> Result<()> {
    let mut seen = HashSet::with_capacity(batch.len());
    for (index, book) in batch.iter().enumerate() {
        if book.uuid.trim().is_empty() {
            return Err(Error::InvalidBatch(format!(
                "book at index {} has an empty uuid",
                index
            )));
        }
        if !seen.insert(book.uuid.as_str()) {
            return Err(Error::InvalidBatch(format!("duplicate book '{}'", book.uuid)));
        }
    }
    Ok(())
}
