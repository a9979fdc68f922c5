//! End-to-end sync scenarios through the public API.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use sidecar_engine::{
    annotation::{normalize, to_tree},
    reconcile, reconcile_until, BindingSet, BookOutcome, ColumnKind, ColumnValue, DeviceBook,
    Field, LibraryRecord, LibrarySet, RawFormat, SidecarRecord, SkipReason, SyncPolicy, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("sidecar_engine=debug"))
        .with_test_writer()
        .try_init();
}

fn bindings() -> BindingSet {
    BindingSet::new()
        .with(Field::PercentReadInt, "#progress", ColumnKind::Int)
        .with(Field::ReadingStatus, "#status", ColumnKind::Text)
        .with(Field::ReadingFinished, "#finished", ColumnKind::Bool)
        .with(Field::FirstBookmark, "#first", ColumnKind::Date)
        .with(Field::LastBookmark, "#last", ColumnKind::Date)
        .with(Field::Annotations, "#annotations", ColumnKind::LongText)
        .with(Field::Review, "#review", ColumnKind::LongText)
        .with(Field::DateSidecarModified, "#modified", ColumnKind::Date)
}

fn library(uuids: &[&str]) -> LibrarySet {
    uuids.iter().map(|uuid| LibraryRecord::new(*uuid)).collect()
}

const READING: &str = r#"-- we can read Lua syntax here!
return {
    ["percent_finished"] = 0.4551,
    ["summary"] = {
        ["status"] = "reading",
        ["note"] = "Slow start",
    },
    ["annotations"] = {
        [1] = {
            ["datetime"] = "2021-03-02 21:10:00",
            ["chapter"] = "Two",
            ["text"] = "second passage",
            ["pos0"] = "/body/DocFragment[4]/p[2]",
            ["pos1"] = "/body/DocFragment[4]/p[2].80",
        },
        [2] = {
            ["datetime"] = "2021-03-01 20:00:00",
            ["chapter"] = "One",
            ["text"] = "first passage",
            ["note"] = "remember this",
            ["pos0"] = "/body/DocFragment[2]/p[7]",
            ["pos1"] = "/body/DocFragment[2]/p[7].12",
        },
    },
}
"#;

// ============================================================================
// Device To Library
// ============================================================================

#[test]
fn progress_is_written_as_integer_percent() {
    init_tracing();
    let mut library = library(&["a"]);
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];

    let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();
    assert_eq!(report.summary.applied, 1);

    let book = library.get("a").unwrap();
    assert_eq!(book.get("#progress"), Some(&ColumnValue::Int(46)));
    assert_eq!(book.get("#status"), Some(&ColumnValue::Text("reading".into())));
    assert_eq!(book.get("#finished"), Some(&ColumnValue::Bool(false)));
    assert_eq!(book.get("#review"), Some(&ColumnValue::LongText("Slow start".into())));
}

#[test]
fn bookmark_dates_span_the_annotations() {
    let mut library = library(&["a"]);
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];
    reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();

    let book = library.get("a").unwrap();
    assert_eq!(
        book.get("#first"),
        Some(&ColumnValue::Date(Utc.with_ymd_and_hms(2021, 3, 1, 20, 0, 0).unwrap()))
    );
    assert_eq!(
        book.get("#last"),
        Some(&ColumnValue::Date(Utc.with_ymd_and_hms(2021, 3, 2, 21, 10, 0).unwrap()))
    );
}

#[test]
fn rendered_annotations_list_each_entry_once_in_order() {
    let mut library = library(&["a"]);
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];
    reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();

    let rendered = library.get("a").unwrap().get("#annotations").unwrap();
    let text = rendered.as_text().unwrap();
    assert_eq!(text.matches("first passage").count(), 1);
    assert_eq!(text.matches("second passage").count(), 1);
    assert!(text.find("first passage").unwrap() < text.find("second passage").unwrap());
    assert!(text.contains("remember this"));
}

#[test]
fn duplicate_bookmarks_keep_the_one_with_a_note() {
    for (first, second) in [("", r#", note = "x""#), (r#", note = "x""#, "")] {
        let text = format!(
            r#"return {{ annotations = {{
                {{ page = 12, datetime = "2021-03-01 20:00:00", text = "same place"{} }},
                {{ page = 12, datetime = "2021-03-01 20:00:00", text = "same place"{} }},
            }} }}"#,
            first, second
        );

        let record = SidecarRecord::parse(&text, None).unwrap();
        assert_eq!(record.annotations.len(), 1, "{}", text);
        assert_eq!(record.annotations[0].note.as_deref(), Some("x"), "{}", text);
    }
}

#[test]
fn legacy_sidecar_folds_highlight_and_bookmark() {
    let text = r#"return {
        highlight = {
            [31] = {
                [1] = {
                    datetime = "2020-11-08 10:00:00",
                    text = "a passage",
                    pos0 = "/body/p[3]",
                    pos1 = "/body/p[3].40",
                    chapter = "Three",
                },
            },
        },
        bookmarks = {
            {
                datetime = "2020-11-08 10:00:00",
                notes = "a passage",
                text = "my note",
                pos0 = "/body/p[3]",
                pos1 = "/body/p[3].40",
                page = "/body/p[3]",
            },
        },
    }"#;

    let record = SidecarRecord::parse(text, None).unwrap();
    assert_eq!(record.annotations.len(), 1);
    let annotation = &record.annotations[0];
    assert_eq!(annotation.text.as_deref(), Some("a passage"));
    assert_eq!(annotation.note.as_deref(), Some("my note"));
    assert_eq!(annotation.chapter.as_deref(), Some("Three"));
}

// ============================================================================
// Failures And Policy Gates
// ============================================================================

#[test]
fn corrupt_sidecar_only_affects_its_book() {
    let mut library = library(&["a", "b", "c"]);
    let batch = [
        DeviceBook::new("a", "/books/A.epub").with_sidecar(READING),
        DeviceBook::new("b", "/books/B.epub").with_sidecar("return { percent_finished = 0.5,"),
        DeviceBook::new("c", "/books/C.epub").with_sidecar("return { percent_finished = 1 }"),
    ];

    let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();
    assert_eq!(report.summary.applied, 2);
    assert_eq!(report.summary.decode_failed, 1);

    let failed = report.result("b").unwrap();
    assert!(matches!(failed.outcome, BookOutcome::DecodeFailed(_)));
    assert!(failed.writes.is_empty());
    assert!(library.get("b").unwrap().values.is_empty());
    assert!(report.summary.diagnostics.iter().any(|d| d.book == "b"));

    assert_eq!(library.get("a").unwrap().get("#progress"), Some(&ColumnValue::Int(46)));
    assert_eq!(library.get("c").unwrap().get("#progress"), Some(&ColumnValue::Int(100)));
}

#[test]
fn finished_books_are_left_alone() {
    let mut library: LibrarySet =
        [LibraryRecord::new("a").with("#status", ColumnValue::Text("complete".into()))]
            .into_iter()
            .collect();
    let before = library.clone();
    let policy = SyncPolicy {
        skip_if_finished: true,
        ..SyncPolicy::default()
    };
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];

    let report = reconcile(&batch, &mut library, &policy, &bindings()).unwrap();
    let result = report.result("a").unwrap();
    assert_eq!(result.outcome, BookOutcome::PolicySkipped(SkipReason::AlreadyFinished));
    assert!(result.writes.is_empty());
    assert_eq!(library, before);
    assert_eq!(report.summary.skipped, 1);
}

#[test]
fn older_sidecars_are_skipped() {
    let synced = Utc.with_ymd_and_hms(2021, 3, 5, 12, 0, 0).unwrap();
    let mut library: LibrarySet = [
        LibraryRecord::new("old").with("#modified", ColumnValue::Date(synced)),
        LibraryRecord::new("new").with("#modified", ColumnValue::Date(synced)),
    ]
    .into_iter()
    .collect();
    let policy = SyncPolicy {
        skip_if_not_newer: true,
        ..SyncPolicy::default()
    };
    let batch = [
        DeviceBook::new("old", "/books/Old.epub")
            .with_sidecar(READING)
            .modified_at(synced),
        DeviceBook::new("new", "/books/New.epub")
            .with_sidecar(READING)
            .modified_at(Utc.with_ymd_and_hms(2021, 3, 6, 8, 0, 0).unwrap()),
    ];

    let report = reconcile(&batch, &mut library, &policy, &bindings()).unwrap();
    assert_eq!(
        report.result("old").unwrap().outcome,
        BookOutcome::PolicySkipped(SkipReason::NotNewer)
    );
    assert_eq!(report.result("new").unwrap().outcome, BookOutcome::Applied);
    assert_eq!(
        library.get("new").unwrap().get("#modified"),
        Some(&ColumnValue::Date(Utc.with_ymd_and_hms(2021, 3, 6, 8, 0, 0).unwrap()))
    );
}

#[test]
fn dry_run_reports_without_writing() {
    let mut library = library(&["a"]);
    let policy = SyncPolicy {
        dry_run: true,
        ..SyncPolicy::default()
    };
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];

    let report = reconcile(&batch, &mut library, &policy, &bindings()).unwrap();
    assert_eq!(report.summary.applied, 1);
    assert!(!report.results[0].writes.is_empty());
    assert!(library.get("a").unwrap().values.is_empty());
}

#[test]
fn cancelled_batch_keeps_finished_books() {
    let mut library = library(&["a", "b"]);
    let batch = [
        DeviceBook::new("a", "/books/A.epub").with_sidecar(READING),
        DeviceBook::new("b", "/books/B.epub").with_sidecar(READING),
    ];

    let report = reconcile_until(
        &batch,
        &mut library,
        &SyncPolicy::default(),
        &bindings(),
        |book| book.uuid != "b",
    )
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.results.len(), 1);
    assert!(library.get("a").unwrap().get("#progress").is_some());
    assert!(library.get("b").unwrap().values.is_empty());
}

#[test]
fn verbatim_raw_sidecar() {
    let bindings = bindings().with(Field::RawSidecar, "#sidecar", ColumnKind::LongText);
    let policy = SyncPolicy {
        raw_format: RawFormat::Verbatim,
        ..SyncPolicy::default()
    };
    let mut library = library(&["a"]);
    let batch = [DeviceBook::new("a", "/books/A.epub").with_sidecar(READING)];

    reconcile(&batch, &mut library, &policy, &bindings).unwrap();
    assert_eq!(
        library.get("a").unwrap().get("#sidecar"),
        Some(&ColumnValue::LongText(READING.into()))
    );
}

// ============================================================================
// Library To Device
// ============================================================================

#[test]
fn missing_sidecar_is_pushed_from_library_columns() {
    init_tracing();
    let bindings = bindings().with(Field::RawSidecar, "#sidecar", ColumnKind::LongText);
    let mut library: LibrarySet = [LibraryRecord::new("a")
        .with("#progress", ColumnValue::Int(46))
        .with("#status", ColumnValue::Text("complete".into()))
        .with("#review", ColumnValue::LongText("Great".into()))]
    .into_iter()
    .collect();
    let policy = SyncPolicy {
        push_missing: true,
        ..SyncPolicy::default()
    };
    let batch = [DeviceBook::new("a", "/mnt/Books/Axis.epub")];

    let report = reconcile(&batch, &mut library, &policy, &bindings).unwrap();
    assert_eq!(report.summary.pushed, 1);

    let output = report.pushes().next().unwrap();
    assert_eq!(output.sidecar_path, "/mnt/Books/Axis.sdr/metadata.epub.lua");

    let pushed = SidecarRecord::parse(&output.text, None).unwrap();
    assert_eq!(pushed.percent_finished, Some(0.46));
    assert!(pushed.is_finished());
    assert_eq!(pushed.review.as_deref(), Some("Great"));
}

#[test]
fn push_needs_policy_and_raw_binding() {
    let mut library: LibrarySet = [LibraryRecord::new("a").with("#progress", ColumnValue::Int(46))]
        .into_iter()
        .collect();
    let batch = [DeviceBook::new("a", "/books/A.epub")];

    let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();
    assert_eq!(report.results[0].outcome, BookOutcome::Skipped(SkipReason::NoSidecar));

    let policy = SyncPolicy {
        push_missing: true,
        ..SyncPolicy::default()
    };
    let report = reconcile(&batch, &mut library, &policy, &bindings()).unwrap();
    assert_eq!(
        report.results[0].outcome,
        BookOutcome::Skipped(SkipReason::PushUnconfigured)
    );
}

// ============================================================================
// Property Tests
// ============================================================================

const DATETIMES: &[&str] = &["2021-03-01 20:00:00", "2021-03-02 09:30:00", "2021-03-03 23:59:59"];

fn arb_leaf(index: usize) -> impl Strategy<Value = Value> {
    (
        "[a-z]{1,10}",
        prop::option::of("[a-z]{1,6}"),
        prop::option::of(0..DATETIMES.len()),
    )
        .prop_map(move |(text, note, datetime)| {
            Value::table([
                ("text", Value::Str(text)),
                ("note", note.map(Value::Str).unwrap_or_default()),
                ("pos0", Value::Str(format!("/body/p[{}]", index))),
                (
                    "datetime",
                    datetime
                        .map(|i| Value::from(DATETIMES[i]))
                        .unwrap_or_default(),
                ),
            ])
        })
}

fn arb_annotations() -> impl Strategy<Value = Value> {
    (0usize..12)
        .prop_flat_map(|count| (0..count).map(arb_leaf).collect::<Vec<_>>())
        .prop_map(|leaves| Value::table([("annotations", Value::sequence(leaves))]))
}

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(tree in arb_annotations()) {
        let once = normalize(&tree).annotations;
        let twice = normalize(&to_tree(&once)).annotations;
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_equal_datetimes_keep_input_order(tree in arb_annotations()) {
        let annotations = normalize(&tree).annotations;
        for pair in annotations.windows(2) {
            if pair[0].datetime == pair[1].datetime {
                let index = |v: &Option<Value>| -> usize {
                    let anchor = v.as_ref().and_then(Value::as_str).unwrap_or_default();
                    anchor
                        .trim_start_matches("/body/p[")
                        .trim_end_matches(']')
                        .parse()
                        .unwrap_or_default()
                };
                prop_assert!(index(&pair[0].pos0) < index(&pair[1].pos0));
            }
        }
    }

    #[test]
    fn prop_percent_int_is_rounded(p in 0.0f64..=1.0) {
        let mut library = library(&["a"]);
        let text = format!("return {{ percent_finished = {:?} }}", p);
        let batch = [DeviceBook::new("a", "/a.epub").with_sidecar(text)];
        reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings()).unwrap();

        let written = library.get("a").unwrap().get("#progress").and_then(ColumnValue::as_i64);
        prop_assert_eq!(written, Some((p * 100.0).round() as i64));
        prop_assert!((0..=100).contains(&written.unwrap_or(-1)));
    }
}
