//! Library records - the caller's view of the destination columns.
//!
//! The host owns persistence. It hands the engine the current column values
//! of the books in a batch and gets back the writes to persist, or, through
//! the C ABI, the updated set itself.

use crate::schema::{ColumnBindings, ColumnValue};
use crate::sidecar::ReadingStatus;
use crate::{error::Result, BookId, ColumnId, Error, Field, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnWrite {
    pub column: ColumnId,
    pub value: ColumnValue,
}

impl ColumnWrite {
    pub fn new(column: impl Into<ColumnId>, value: ColumnValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Column values of one library book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRecord {
    pub uuid: BookId,
    #[serde(default)]
    pub values: BTreeMap<ColumnId, ColumnValue>,
}

impl LibraryRecord {
    pub fn new(uuid: impl Into<BookId>) -> Self {
        Self {
            uuid: uuid.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style method to set a column.
    pub fn with(mut self, column: impl Into<ColumnId>, value: ColumnValue) -> Self {
        self.values.insert(column.into(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column)
    }

    /// Current value of the column bound to `field`.
    pub fn field<B>(&self, field: Field, bindings: &B) -> Option<&ColumnValue>
    where
        B: ColumnBindings + ?Sized,
    {
        bindings.column_for(field).and_then(|column| self.get(column))
    }

    /// Set a column, returning the previous value.
    pub fn set(&mut self, column: impl Into<ColumnId>, value: ColumnValue) -> Option<ColumnValue> {
        self.values.insert(column.into(), value)
    }
}

/// The library books of one batch, keyed by uuid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "LibraryRecords")]
pub struct LibrarySet {
    records: BTreeMap<BookId, LibraryRecord>,
}

/// Wire form of a `LibrarySet`, checked before use.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryRecords {
    #[serde(default)]
    records: BTreeMap<BookId, LibraryRecord>,
}

impl TryFrom<LibraryRecords> for LibrarySet {
    type Error = Error;

    fn try_from(wire: LibraryRecords) -> Result<Self> {
        for (key, record) in &wire.records {
            if *key != record.uuid {
                return Err(Error::InvalidValue(format!(
                    "library record keyed '{}' has uuid '{}'",
                    key, record.uuid
                )));
            }
        }
        Ok(Self {
            records: wire.records,
        })
    }
}

impl LibrarySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<&LibraryRecord> {
        self.records.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut LibraryRecord> {
        self.records.get_mut(uuid)
    }

    /// Insert a record, replacing any with the same uuid.
    pub fn insert(&mut self, record: LibraryRecord) {
        self.records.insert(record.uuid.clone(), record);
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.records.contains_key(uuid)
    }

    pub fn records(&self) -> impl Iterator<Item = &LibraryRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply writes to a book. Returns how many columns actually changed.
    pub fn apply(&mut self, uuid: &str, writes: &[ColumnWrite]) -> Result<usize> {
        let record = self
            .records
            .get_mut(uuid)
            .ok_or_else(|| Error::InvalidValue(format!("no library record for {}", uuid)))?;

        let mut changed = 0;
        for write in writes {
            let previous = record.set(write.column.clone(), write.value.clone());
            if previous.as_ref() != Some(&write.value) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl FromIterator<LibraryRecord> for LibrarySet {
    fn from_iter<I: IntoIterator<Item = LibraryRecord>>(iter: I) -> Self {
        let mut set = LibrarySet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// Whether the library already marks a book as finished.
///
/// Answered from whichever of the status text, finished flag and percent
/// columns are bound. Nothing bound means not finished.
pub fn reading_finished<B: ColumnBindings + ?Sized>(record: &LibraryRecord, bindings: &B) -> bool {
    let status = record
        .field(Field::ReadingStatus, bindings)
        .and_then(ColumnValue::as_text)
        .map(ReadingStatus::parse);
    if status == Some(ReadingStatus::Finished) {
        return true;
    }

    if let Some(ColumnValue::Bool(true)) = record.field(Field::ReadingFinished, bindings) {
        return true;
    }

    let fraction = record
        .field(Field::PercentRead, bindings)
        .and_then(ColumnValue::as_f64);
    let percent = record
        .field(Field::PercentReadInt, bindings)
        .and_then(ColumnValue::as_f64);
    fraction.is_some_and(|p| p >= 1.0) || percent.is_some_and(|p| p >= 100.0)
}

/// Sidecar modification time recorded by the previous sync, if any.
pub fn recorded_sidecar_modified<B: ColumnBindings + ?Sized>(
    record: &LibraryRecord,
    bindings: &B,
) -> Option<Timestamp> {
    record
        .field(Field::DateSidecarModified, bindings)
        .and_then(ColumnValue::as_date)
}
