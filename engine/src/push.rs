//! Push path: library metadata to a new sidecar.
//!
//! Used for books that have no sidecar on the device yet. The stored raw
//! sidecar column (if bound and present) is the base tree. Values of the
//! bound pushable fields are read back from their columns and merged on top,
//! so the library's current progress, status and review win over whatever
//! the stored copy said.

use crate::decode::decode;
use crate::device::sidecar_path;
use crate::encode::encode_sidecar;
use crate::library::LibraryRecord;
use crate::schema::{ColumnBindings, ColumnValue};
use crate::sidecar::SidecarRecord;
use crate::value::Value;
use crate::{Error, Field};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A synthesized sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    /// `None` when there is nothing to push
    pub tree: Option<Value>,
    /// Columns that could not be read back; the rest of the sidecar is intact
    pub field_errors: Vec<Error>,
}

/// Sidecar text ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutput {
    pub sidecar_path: String,
    pub text: String,
}

/// Outcome of a push for one book.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAttempt {
    /// `None` when the library holds nothing to push
    pub output: Option<PushOutput>,
    pub field_errors: Vec<Error>,
}

/// Build the sidecar tree for a library book.
///
/// The tree is `None` when there is nothing to push: no readable stored
/// sidecar and no bound pushable field with a value. Errors reading the
/// columns are returned either way.
pub fn synthesize<B>(record: &LibraryRecord, bindings: &B) -> Synthesized
where
    B: ColumnBindings + ?Sized,
{
    let mut field_errors = Vec::new();

    let base = match record.field(Field::RawSidecar, bindings) {
        Some(value) => match stored_tree(value) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!(book = %record.uuid, error = %e, "stored sidecar unreadable");
                field_errors.push(e);
                None
            }
        },
        None => None,
    };

    let mut sidecar = SidecarRecord::default();
    for field in Field::ALL.into_iter().filter(Field::is_pushable) {
        let Some(value) = record.field(field, bindings) else {
            continue;
        };
        if let Err(e) = field.absorb(value, &mut sidecar) {
            warn!(book = %record.uuid, field = %field, error = %e, "column not pushed");
            field_errors.push(e);
        }
    }

    let fragments: Vec<Value> = Field::ALL
        .into_iter()
        .filter(Field::is_pushable)
        .filter_map(|field| field.synthesize(&sidecar))
        .collect();

    if base.is_none() && fragments.is_empty() {
        return Synthesized {
            tree: None,
            field_errors,
        };
    }

    let mut tree = base.unwrap_or_else(Value::empty_table);
    for fragment in fragments {
        tree.merge(fragment);
    }
    debug!(book = %record.uuid, keys = tree.entries().len(), "synthesized sidecar");

    Synthesized {
        tree: Some(tree),
        field_errors,
    }
}

/// Synthesize and encode the sidecar for the book at `book_path`.
pub fn push<B>(book_path: &str, record: &LibraryRecord, bindings: &B) -> PushAttempt
where
    B: ColumnBindings + ?Sized,
{
    let synthesized = synthesize(record, bindings);
    PushAttempt {
        output: synthesized.tree.map(|tree| PushOutput {
            sidecar_path: sidecar_path(book_path),
            text: encode_sidecar(&tree),
        }),
        field_errors: synthesized.field_errors,
    }
}

/// Parse the raw sidecar column. It holds either the JSON projection or the
/// verbatim sidecar text, depending on how it was synced. A bare Lua table
/// literal also starts with `{`, so JSON falls back to the Lua decoder.
fn stored_tree(value: &ColumnValue) -> Result<Value, Error> {
    let text = value.as_text().ok_or_else(|| {
        Error::InvalidValue(format!("raw_sidecar cannot hold a {} value", value.kind()))
    })?;

    let tree = if text.trim_start().starts_with('{') {
        match serde_json::from_str(text) {
            Ok(tree) => tree,
            Err(json_error) => decode(text).map_err(|lua_error| {
                Error::InvalidValue(format!(
                    "stored sidecar is neither JSON ({}) nor a Lua literal ({})",
                    json_error, lua_error
                ))
            })?,
        }
    } else {
        decode(text)?
    };

    if tree.is_table() {
        Ok(tree)
    } else {
        Err(Error::InvalidValue(format!(
            "stored sidecar is a {}, not a table",
            tree.type_name()
        )))
    }
}
