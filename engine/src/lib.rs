//! # Sidecar Engine
//!
//! Reconciles e-reader sidecar files with library metadata columns.
//!
//! KOReader keeps per-book state (progress, status, highlights, review) in a
//! `metadata.<ext>.lua` sidecar next to each book. This crate reads those
//! sidecars, derives column values from them and writes the values into the
//! caller's library records. It also runs the other way, synthesizing a
//! sidecar from library columns for books that have none on the device.
//!
//! ## Design Principles
//!
//! - **No IO**: the caller reads sidecar files and persists column writes
//! - **Never aborts a batch**: a bad sidecar or column only affects its book
//! - **Injected configuration**: policy and column bindings are passed in on
//!   every call, there is no process-wide state
//!
//! ## Core Concepts
//!
//! ### Value trees
//!
//! [`decode`](decode::decode) turns Lua literal text into a [`Value`] tree and
//! [`encode`](encode::encode) writes one back.
//!
//! ### Sidecar records
//!
//! [`SidecarRecord::build`] extracts the synchronizable facts of a tree.
//! Missing or oddly typed fields are simply absent. Annotations from every
//! firmware generation are normalized by [`annotation::normalize`].
//!
//! ### Fields and bindings
//!
//! Each [`Field`] derives one column value from a record. [`ColumnBindings`]
//! says which column a field lands in and what kind of value that column holds.
//!
//! ### Reconciliation
//!
//! [`reconcile()`] runs a batch of [`DeviceBook`]s against a [`LibrarySet`] under
//! a [`SyncPolicy`] and returns a [`SyncReport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use sidecar_engine::{
//!     reconcile, BindingSet, ColumnKind, ColumnValue, DeviceBook, Field, LibraryRecord,
//!     LibrarySet, SyncPolicy,
//! };
//!
//! // 1. Bind fields to library columns
//! let bindings = BindingSet::new()
//!     .with(Field::PercentReadInt, "#progress", ColumnKind::Int)
//!     .with(Field::ReadingStatus, "#status", ColumnKind::Text);
//!
//! // 2. The library side of the batch
//! let mut library: LibrarySet = [LibraryRecord::new("book-1")].into_iter().collect();
//!
//! // 3. The device side
//! let sidecar = r#"-- we can read Lua syntax here!
//! return {
//!     ["percent_finished"] = 0.4551,
//!     ["summary"] = { ["status"] = "reading" },
//! }"#;
//! let batch = [DeviceBook::new("book-1", "/books/Axis.epub").with_sidecar(sidecar)];
//!
//! // 4. Reconcile
//! let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings).unwrap();
//! assert_eq!(report.summary.applied, 1);
//!
//! let book = library.get("book-1").unwrap();
//! assert_eq!(book.get("#progress"), Some(&ColumnValue::Int(46)));
//! assert_eq!(book.get("#status"), Some(&ColumnValue::Text("reading".into())));
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for hosts that load the
//! engine as a shared library. All data is exchanged as JSON strings.

pub mod annotation;
pub mod decode;
pub mod device;
pub mod encode;
pub mod error;
pub mod ffi;
pub mod field;
pub mod library;
pub mod policy;
pub mod push;
pub mod reconcile;
pub mod render;
pub mod schema;
pub mod sidecar;
pub mod value;

// Re-export main types at crate root
pub use annotation::{AnnotationKind, AnnotationRecord, NormalizeOutcome};
pub use device::DeviceSupport;
pub use error::{DecodeError, DecodeErrorKind, Error};
pub use field::{DeriveContext, Field};
pub use library::{ColumnWrite, LibraryRecord, LibrarySet};
pub use policy::{RawFormat, SyncPolicy};
pub use push::{PushAttempt, PushOutput};
pub use reconcile::{
    reconcile, reconcile_until, BookOutcome, BookResult, DeviceBook, Diagnostic, Reconciler,
    SkipReason, SyncReport, SyncSummary,
};
pub use schema::{BindingSet, ColumnBinding, ColumnBindings, ColumnKind, ColumnValue};
pub use sidecar::{ReadingStatus, SidecarRecord};
pub use value::{Key, Value};

/// Type aliases for clarity
pub type BookId = String;
pub type ColumnId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
