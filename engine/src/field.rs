//! Field transform registry.
//!
//! Every synchronizable column is a [`Field`]. A field knows how to derive
//! its column value from a [`SidecarRecord`], how to read a column value back
//! into a record, and, for the fields the device understands, how to
//! synthesize the sidecar fragment that carries it.

use crate::annotation::AnnotationRecord;
use crate::policy::RawFormat;
use crate::render::render_annotations;
use crate::schema::{ColumnKind, ColumnValue};
use crate::sidecar::{ReadingStatus, SidecarRecord};
use crate::value::Value;
use crate::{error::Result, Error, Timestamp};
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// A logical synchronizable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Fraction read, 0 to 1
    PercentRead,
    /// Percent read, 0 to 100
    PercentReadInt,
    ReadingStatus,
    /// Whether the status is finished
    ReadingFinished,
    /// Earliest annotation datetime
    FirstBookmark,
    /// Latest annotation datetime
    LastBookmark,
    /// Rendered markdown list of annotations
    Annotations,
    /// The whole sidecar, for storage and later push
    RawSidecar,
    LastReadLocation,
    /// Star rating on the library's 0 to 10 scale
    Rating,
    Review,
    DateStatusModified,
    Md5,
    DateSidecarModified,
    DateSynced,
    Pages,
}

/// Inputs to derivation that do not come from the sidecar itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeriveContext<'a> {
    pub raw_format: RawFormat,
    /// Sidecar text as read, used by [`RawFormat::Verbatim`]
    pub raw_text: Option<&'a str>,
    pub synced_at: Option<Timestamp>,
}

impl Field {
    /// Every field, in derivation order.
    pub const ALL: [Field; 16] = [
        Field::PercentRead,
        Field::PercentReadInt,
        Field::ReadingStatus,
        Field::ReadingFinished,
        Field::FirstBookmark,
        Field::LastBookmark,
        Field::Annotations,
        Field::RawSidecar,
        Field::LastReadLocation,
        Field::Rating,
        Field::Review,
        Field::DateStatusModified,
        Field::Md5,
        Field::DateSidecarModified,
        Field::DateSynced,
        Field::Pages,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::PercentRead => "percent_read",
            Field::PercentReadInt => "percent_read_int",
            Field::ReadingStatus => "reading_status",
            Field::ReadingFinished => "reading_finished",
            Field::FirstBookmark => "first_bookmark",
            Field::LastBookmark => "last_bookmark",
            Field::Annotations => "annotations",
            Field::RawSidecar => "raw_sidecar",
            Field::LastReadLocation => "last_read_location",
            Field::Rating => "rating",
            Field::Review => "review",
            Field::DateStatusModified => "date_status_modified",
            Field::Md5 => "md5",
            Field::DateSidecarModified => "date_sidecar_modified",
            Field::DateSynced => "date_synced",
            Field::Pages => "pages",
        }
    }

    /// Kind of value [`derive`](Self::derive) produces.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Field::PercentRead => ColumnKind::Float,
            Field::PercentReadInt | Field::Rating | Field::Pages => ColumnKind::Int,
            Field::ReadingStatus | Field::LastReadLocation | Field::Md5 => ColumnKind::Text,
            Field::ReadingFinished => ColumnKind::Bool,
            Field::FirstBookmark
            | Field::LastBookmark
            | Field::DateStatusModified
            | Field::DateSidecarModified
            | Field::DateSynced => ColumnKind::Date,
            Field::Annotations | Field::RawSidecar | Field::Review => ColumnKind::LongText,
        }
    }

    /// Whether the field can be written back into a sidecar.
    pub fn is_pushable(&self) -> bool {
        matches!(
            self,
            Field::PercentRead
                | Field::PercentReadInt
                | Field::ReadingStatus
                | Field::ReadingFinished
                | Field::DateStatusModified
                | Field::Rating
                | Field::Review
                | Field::Md5
                | Field::LastReadLocation
        )
    }

    /// Column value for this field, or `None` when the record lacks it.
    pub fn derive(&self, record: &SidecarRecord, ctx: &DeriveContext<'_>) -> Option<ColumnValue> {
        match self {
            Field::PercentRead => record.percent_finished.map(ColumnValue::Float),
            Field::PercentReadInt => record
                .percent_finished
                .map(|p| ColumnValue::Int((p * 100.0).round() as i64)),
            Field::ReadingStatus => record
                .status
                .label()
                .map(|label| ColumnValue::Text(label.to_string())),
            Field::ReadingFinished => (record.status != ReadingStatus::Unknown)
                .then(|| ColumnValue::Bool(record.is_finished())),
            Field::FirstBookmark => annotation_dates(&record.annotations)
                .min()
                .map(|dt| ColumnValue::Date(utc(dt))),
            Field::LastBookmark => annotation_dates(&record.annotations)
                .max()
                .map(|dt| ColumnValue::Date(utc(dt))),
            Field::Annotations => {
                render_annotations(&record.annotations).map(ColumnValue::LongText)
            }
            Field::RawSidecar => raw_sidecar(record, ctx).map(ColumnValue::LongText),
            Field::LastReadLocation => record.last_location.clone().map(ColumnValue::Text),
            Field::Rating => record.rating.map(|stars| ColumnValue::Int(stars * 2)),
            Field::Review => record.review.clone().map(ColumnValue::LongText),
            Field::DateStatusModified => record
                .status_modified
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|dt| ColumnValue::Date(utc(dt))),
            Field::Md5 => record.md5.clone().map(ColumnValue::Text),
            Field::DateSidecarModified => record.last_modified.map(ColumnValue::Date),
            Field::DateSynced => ctx.synced_at.map(ColumnValue::Date),
            Field::Pages => record.pages.map(ColumnValue::Int),
        }
    }

    /// Read a library column value back into a record.
    ///
    /// Fields that cannot be pushed are ignored. A value of the wrong kind,
    /// or out of range, is an error.
    pub fn absorb(&self, value: &ColumnValue, record: &mut SidecarRecord) -> Result<()> {
        let wrong = || {
            Error::InvalidValue(format!(
                "{} cannot hold a {} value",
                self.name(),
                value.kind()
            ))
        };

        match self {
            Field::PercentRead => {
                let p = value.as_f64().ok_or_else(wrong)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(Error::InvalidValue(format!("percent_read {} out of range", p)));
                }
                record.percent_finished = Some(p);
            }
            Field::PercentReadInt => {
                let p = value.as_f64().ok_or_else(wrong)?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(Error::InvalidValue(format!(
                        "percent_read_int {} out of range",
                        p
                    )));
                }
                // The fraction is more precise; keep it if it was absorbed.
                record.percent_finished.get_or_insert(p / 100.0);
            }
            Field::ReadingStatus => {
                let text = value.as_text().ok_or_else(wrong)?;
                let status = ReadingStatus::parse(text);
                if status != ReadingStatus::Unknown {
                    record.status = status;
                }
            }
            Field::ReadingFinished => {
                if value.as_bool().ok_or_else(wrong)? && record.status == ReadingStatus::Unknown {
                    record.status = ReadingStatus::Finished;
                }
            }
            Field::DateStatusModified => {
                record.status_modified = Some(value.as_date().ok_or_else(wrong)?.date_naive());
            }
            Field::Rating => {
                let rating = value.as_f64().ok_or_else(wrong)?;
                if !(0.0..=10.0).contains(&rating) {
                    return Err(Error::InvalidValue(format!("rating {} out of range", rating)));
                }
                record.rating = Some((rating / 2.0).round() as i64);
            }
            Field::Review => {
                record.review = non_empty(value.as_text().ok_or_else(wrong)?);
            }
            Field::Md5 => {
                record.md5 = non_empty(value.as_text().ok_or_else(wrong)?);
            }
            Field::LastReadLocation => {
                record.last_location = non_empty(value.as_text().ok_or_else(wrong)?);
            }
            _ => {}
        }
        Ok(())
    }

    /// Sidecar fragment carrying this field, for pushable fields whose value
    /// the record has.
    pub fn synthesize(&self, record: &SidecarRecord) -> Option<Value> {
        let summary =
            |key: &str, value: Value| Value::table([("summary", Value::table([(key, value)]))]);

        match self {
            Field::PercentRead | Field::PercentReadInt => record
                .percent_finished
                .map(|p| Value::table([("percent_finished", Value::from(p))])),
            Field::ReadingStatus | Field::ReadingFinished => record
                .status
                .label()
                .map(|label| summary("status", Value::from(label))),
            Field::DateStatusModified => record
                .status_modified
                .map(|date| summary("modified", Value::from(date.format("%Y-%m-%d").to_string()))),
            Field::Rating => record.rating.map(|stars| summary("rating", Value::from(stars))),
            Field::Review => record
                .review
                .as_deref()
                .map(|review| summary("note", Value::from(review))),
            Field::Md5 => record
                .md5
                .as_deref()
                .map(|md5| Value::table([("partial_md5_checksum", Value::from(md5))])),
            Field::LastReadLocation => record
                .last_location
                .as_deref()
                .map(|location| Value::table([("last_xpointer", Value::from(location))])),
            _ => None,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Field::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown field: {}", s)))
    }
}

fn annotation_dates(annotations: &[AnnotationRecord]) -> impl Iterator<Item = NaiveDateTime> + '_ {
    annotations.iter().filter_map(|a| a.datetime)
}

fn utc(datetime: NaiveDateTime) -> Timestamp {
    Utc.from_utc_datetime(&datetime)
}

fn raw_sidecar(record: &SidecarRecord, ctx: &DeriveContext<'_>) -> Option<String> {
    if ctx.raw_format == RawFormat::Verbatim {
        if let Some(text) = ctx.raw_text {
            return Some(text.to_string());
        }
    }
    match serde_json::to_string(&record.raw) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "could not project sidecar to JSON");
            None
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
