//! Edge case tests for sidecar-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use proptest::prelude::*;
use sidecar_engine::{
    annotation::normalize,
    decode::{decode, MAX_DEPTH},
    device::sidecar_path,
    encode::{encode, encode_sidecar},
    reconcile, AnnotationKind, BindingSet, BookOutcome, ColumnKind, ColumnValue, DecodeErrorKind,
    DeviceBook, Field, Key, LibraryRecord, LibrarySet, SidecarRecord, SyncPolicy, Value,
};

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_strings() {
    assert_eq!(decode(r#""""#).unwrap(), Value::from(""));
    assert_eq!(decode("''").unwrap(), Value::from(""));
    assert_eq!(decode("[[]]").unwrap(), Value::from(""));
}

#[test]
fn unicode_strings() {
    let samples = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Ω≈ç√∫",
        "Hello\nWorld\tTab",
    ];

    for sample in samples {
        let text = encode(&Value::from(sample));
        assert_eq!(decode(&text).unwrap(), Value::from(sample), "sample {:?}", sample);
    }
}

#[test]
fn escape_sequences() {
    assert_eq!(decode(r#""a\tb\\c\"d""#).unwrap(), Value::from("a\tb\\c\"d"));
    assert_eq!(decode(r#""\65\066\0677""#).unwrap(), Value::from("ABC7"));
    assert_eq!(decode(r#""\x41\u{e9}""#).unwrap(), Value::from("Aé"));
    assert_eq!(decode("\"one\\z   \n  two\"").unwrap(), Value::from("onetwo"));
    assert_eq!(decode("'it\\'s'").unwrap(), Value::from("it's"));
}

#[test]
fn invalid_escapes_fail() {
    for text in [r#""\q""#, r#""\x4""#, r#""\u{110000}""#, r#""\999""#] {
        let err = decode(text).unwrap_err();
        assert!(
            matches!(err.kind, DecodeErrorKind::InvalidEscape(_)),
            "{}: {:?}",
            text,
            err
        );
    }
}

#[test]
fn long_bracket_strings() {
    // A newline right after the opening bracket is not part of the string
    assert_eq!(decode("[[\nline one\nline two]]").unwrap(), Value::from("line one\nline two"));
    assert_eq!(decode("[==[ has ]] inside ]==]").unwrap(), Value::from(" has ]] inside "));
    assert_eq!(decode(r"[[no \n escapes]]").unwrap(), Value::from(r"no \n escapes"));
}

#[test]
fn unterminated_strings_fail() {
    for text in [r#""open"#, "'open", "[[open", "[=[open]]"] {
        assert_eq!(decode(text).unwrap_err().kind, DecodeErrorKind::UnexpectedEnd, "{}", text);
    }
}

#[test]
fn very_long_string() {
    let long = "x".repeat(100_000);
    let text = encode(&Value::from(long.as_str()));
    assert_eq!(decode(&text).unwrap(), Value::Str(long));
}

// ============================================================================
// Number Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    assert_eq!(decode("0").unwrap(), Value::Int(0));
    assert_eq!(decode("-0").unwrap(), Value::Int(0));
    assert_eq!(decode(&i64::MAX.to_string()).unwrap(), Value::Int(i64::MAX));
    assert_eq!(decode(&i64::MIN.to_string()).unwrap(), Value::Int(i64::MIN));

    // Past i64 the literal is still a number
    assert_eq!(
        decode("9223372036854775808").unwrap(),
        Value::Float(9_223_372_036_854_775_808.0)
    );
}

#[test]
fn hex_and_exponent_numbers() {
    assert_eq!(decode("0xff").unwrap(), Value::Int(255));
    assert_eq!(decode("0XFF").unwrap(), Value::Int(255));
    assert_eq!(decode("-0x10").unwrap(), Value::Int(-16));
    assert_eq!(decode("1e3").unwrap(), Value::Float(1000.0));
    assert_eq!(decode("2.5E-1").unwrap(), Value::Float(0.25));
    assert_eq!(decode(".5").unwrap(), Value::Float(0.5));
    assert_eq!(decode("5.").unwrap(), Value::Float(5.0));
}

#[test]
fn malformed_numbers_fail() {
    for text in ["12abc", "0x", "-", "1e"] {
        let err = decode(text).unwrap_err();
        assert!(
            matches!(err.kind, DecodeErrorKind::InvalidNumber(_)),
            "{}: {:?}",
            text,
            err
        );
    }
}

#[test]
fn non_finite_floats_encode_as_nil() {
    let tree = Value::table([("a", Value::Float(f64::INFINITY)), ("b", Value::Int(1))]);
    let back = decode(&encode(&tree)).unwrap();
    assert_eq!(back, Value::table([("b", Value::Int(1))]));
}

// ============================================================================
// Table Edge Cases
// ============================================================================

#[test]
fn empty_table_is_a_map() {
    assert_eq!(decode("{}").unwrap(), Value::empty_table());
    assert_eq!(decode("return {};").unwrap(), Value::empty_table());
}

#[test]
fn sparse_integer_keys_stay_a_map() {
    let tree = decode("{ [1] = 'a', [3] = 'c' }").unwrap();
    match &tree {
        Value::Map(map) => {
            assert_eq!(map.len(), 2);
            assert_eq!(map.get(&Key::Int(3)), Some(&Value::from("c")));
        }
        other => panic!("expected a map, got {:?}", other),
    }

    // Keys starting at 0 are not a sequence either
    assert!(matches!(decode("{ [0] = 1, [1] = 2 }").unwrap(), Value::Map(_)));
}

#[test]
fn dense_integer_keys_are_a_sequence() {
    let explicit = decode("{ [2] = 'b', [1] = 'a' }").unwrap();
    let positional = decode("{ 'a', 'b' }").unwrap();
    assert_eq!(explicit, positional);
    assert_eq!(explicit, Value::sequence([Value::from("a"), Value::from("b")]));
}

#[test]
fn nil_entries_are_dropped() {
    let tree = decode("{ a = 1, b = nil, [1] = nil }").unwrap();
    assert_eq!(tree, Value::table([("a", Value::Int(1))]));
}

#[test]
fn float_keys() {
    assert_eq!(decode("{ [1.0] = 'x' }").unwrap(), Value::sequence([Value::from("x")]));

    let err = decode("{ [1.5] = 'x' }").unwrap_err();
    assert!(matches!(err.kind, DecodeErrorKind::UnsupportedKey(_)));
}

#[test]
fn unsupported_keys_fail() {
    for text in ["{ [true] = 1 }", "{ [{}] = 1 }", "{ [nil] = 1 }"] {
        let err = decode(text).unwrap_err();
        assert!(
            matches!(err.kind, DecodeErrorKind::UnsupportedKey(_)),
            "{}: {:?}",
            text,
            err
        );
    }
}

#[test]
fn separators_and_trailing_commas() {
    let a = decode("{ 1; 2, 3, }").unwrap();
    let b = decode("{1,2,3}").unwrap();
    assert_eq!(a, b);
    assert!(decode("{ 1 2 }").is_err());
    assert!(decode("{ , }").is_err());
}

#[test]
fn deep_nesting_is_rejected() {
    let deep = format!("{}{}", "{".repeat(MAX_DEPTH + 1), "}".repeat(MAX_DEPTH + 1));
    let err = decode(&deep).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::TooDeep);
    assert_eq!(err.line, 1);

    let limit = format!("{}{}", "{".repeat(MAX_DEPTH), "}".repeat(MAX_DEPTH));
    assert!(decode(&limit).is_ok());
}

#[test]
fn code_is_not_data() {
    for text in [
        "return function() end",
        "return { a = os.time() }",
        "return { a = b }",
        "local t = {} return t",
    ] {
        assert!(decode(text).is_err(), "{}", text);
    }
}

#[test]
fn trailing_input_fails() {
    assert_eq!(decode("{} {}").unwrap_err().kind, DecodeErrorKind::TrailingInput);
    assert_eq!(decode("return 1 2").unwrap_err().kind, DecodeErrorKind::TrailingInput);
}

#[test]
fn comments_everywhere() {
    let text = "--[==[ block\n comment ]==]\n-- header\nreturn { -- trailing\n a = --[[ inline ]] 1,\n}\n-- end";
    assert_eq!(decode(text).unwrap(), Value::table([("a", Value::Int(1))]));
}

#[test]
fn empty_input_fails() {
    assert_eq!(decode("").unwrap_err().kind, DecodeErrorKind::UnexpectedEnd);
    assert_eq!(decode("-- only a comment\n").unwrap_err().kind, DecodeErrorKind::UnexpectedEnd);
    assert_eq!(decode("return").unwrap_err().kind, DecodeErrorKind::UnexpectedEnd);
}

// ============================================================================
// Sidecar Record Edge Cases
// ============================================================================

#[test]
fn sidecar_that_is_not_a_table() {
    let record = SidecarRecord::parse("return 42", None).unwrap();
    assert_eq!(record.percent_finished, None);
    assert!(record.annotations.is_empty());
    assert_eq!(record.raw, Value::Int(42));
}

#[test]
fn oddly_typed_fields_are_absent() {
    let record = SidecarRecord::parse(
        r#"return {
            percent_finished = "half",
            summary = { status = 3, rating = 9, note = "  " },
            doc_pages = -1,
            partial_md5_checksum = {},
        }"#,
        None,
    )
    .unwrap();

    assert_eq!(record.percent_finished, None);
    assert!(!record.is_finished());
    assert_eq!(record.rating, None);
    assert_eq!(record.review, None);
    assert_eq!(record.pages, None);
    assert_eq!(record.md5, None);
}

#[test]
fn percent_bounds() {
    for (text, expected) in [
        ("return { percent_finished = 0 }", Some(0.0)),
        ("return { percent_finished = 1 }", Some(1.0)),
        ("return { percent_finished = 1.0001 }", None),
        ("return { percent_finished = -0.1 }", None),
    ] {
        assert_eq!(SidecarRecord::parse(text, None).unwrap().percent_finished, expected, "{}", text);
    }
}

// ============================================================================
// Annotation Edge Cases
// ============================================================================

#[test]
fn empty_annotation_containers() {
    for text in [
        "return { annotations = {} }",
        "return { highlight = {}, bookmarks = {} }",
        "return { highlight = { [12] = {} } }",
    ] {
        let outcome = normalize(&decode(text).unwrap());
        assert!(outcome.annotations.is_empty(), "{}", text);
        assert!(!outcome.is_suspicious(), "{}", text);
    }
}

#[test]
fn unreadable_leaves_are_counted() {
    let tree = decode(r#"return { annotations = { { foo = 1 }, "text", { text = "kept" } } }"#)
        .unwrap();
    let outcome = normalize(&tree);
    assert_eq!(outcome.annotations.len(), 1);
    assert_eq!(outcome.skipped, 2);
    assert!(!outcome.is_suspicious());

    let tree = decode(r#"return { annotations = { { foo = 1 } } }"#).unwrap();
    assert!(normalize(&tree).is_suspicious());
}

#[test]
fn bad_datetimes_sort_last() {
    let tree = decode(
        r#"return { annotations = {
            { text = "undated", pos0 = "a" },
            { text = "garbled", pos0 = "b", datetime = "yesterday" },
            { text = "dated", pos0 = "c", datetime = "2021-01-01 00:00:00" },
        } }"#,
    )
    .unwrap();

    let texts: Vec<_> = normalize(&tree)
        .annotations
        .into_iter()
        .map(|a| a.text.unwrap())
        .collect();
    assert_eq!(texts, ["dated", "undated", "garbled"]);
}

#[test]
fn bookmark_without_anchor() {
    let tree = decode(r#"return { bookmarks = { { page = 12, datetime = "2021-01-01 10:00:00" } } }"#)
        .unwrap();
    let outcome = normalize(&tree);
    assert_eq!(outcome.annotations.len(), 1);
    assert_eq!(outcome.annotations[0].kind, AnnotationKind::Bookmark);
    assert_eq!(outcome.annotations[0].page, Some(Value::Int(12)));
}

#[test]
fn entries_without_identity_are_never_folded() {
    let tree = decode(r#"return { annotations = { { text = "same" }, { text = "same" } } }"#).unwrap();
    let outcome = normalize(&tree);
    assert_eq!(outcome.annotations.len(), 2);
    assert_eq!(outcome.merged, 0);
}

#[test]
fn paged_document_positions() {
    let tree = decode(
        r#"return { annotations = {
            { text = "a", pos0 = { page = 3, x = 10, y = 20 }, pos1 = { page = 3, x = 90, y = 20 } },
            { text = "a", note = "n", pos0 = { page = 3, x = 10, y = 20 }, pos1 = { page = 3, x = 90, y = 20 } },
        } }"#,
    )
    .unwrap();
    let outcome = normalize(&tree);
    assert_eq!(outcome.annotations.len(), 1);
    assert_eq!(outcome.annotations[0].note.as_deref(), Some("n"));
}

// ============================================================================
// Device Path Edge Cases
// ============================================================================

#[test]
fn sidecar_paths() {
    assert_eq!(sidecar_path("/b/Axis.epub"), "/b/Axis.sdr/metadata.epub.lua");
    assert_eq!(sidecar_path("/b/a.tar.gz"), "/b/a.tar.sdr/metadata.gz.lua");
    assert_eq!(sidecar_path("/b/README"), "/b/README.sdr/metadata.lua");
    assert_eq!(sidecar_path("/b/.hidden"), "/b/.hidden.sdr/metadata.lua");
    assert_eq!(sidecar_path("/v.1/book"), "/v.1/book.sdr/metadata.lua");
    assert_eq!(sidecar_path(r"D:\Books\Axis.pdf"), r"D:\Books\Axis.sdr/metadata.pdf.lua");
}

// ============================================================================
// Reconciliation Edge Cases
// ============================================================================

#[test]
fn empty_batch() {
    let mut library = LibrarySet::new();
    let report = reconcile(&[], &mut library, &SyncPolicy::default(), &BindingSet::new()).unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.summary.total(), 0);
    assert!(!report.cancelled);
}

#[test]
fn no_bindings_means_no_writes() {
    let mut library: LibrarySet = [LibraryRecord::new("a")].into_iter().collect();
    let batch = [DeviceBook::new("a", "/a.epub").with_sidecar("return { percent_finished = 0.5 }")];

    let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &BindingSet::new()).unwrap();
    assert_eq!(report.results[0].outcome, BookOutcome::Applied);
    assert!(report.results[0].writes.is_empty());
    assert!(library.get("a").unwrap().values.is_empty());
}

#[test]
fn blank_uuid_rejects_the_batch() {
    let mut library = LibrarySet::new();
    let batch = [DeviceBook::new("  ", "/a.epub")];
    assert!(reconcile(&batch, &mut library, &SyncPolicy::default(), &BindingSet::new()).is_err());
}

#[test]
fn binding_to_undeclared_column() {
    let mut bindings = BindingSet::new().with(Field::Pages, "#pages", ColumnKind::Int);
    bindings.fields.insert(Field::Review, "#review".to_string());

    let mut library: LibrarySet = [LibraryRecord::new("a")].into_iter().collect();
    let batch = [DeviceBook::new("a", "/a.epub")
        .with_sidecar(r#"return { doc_pages = 300, summary = { note = "Great" } }"#)];

    let report = reconcile(&batch, &mut library, &SyncPolicy::default(), &bindings).unwrap();
    let result = report.result("a").unwrap();
    assert_eq!(result.outcome, BookOutcome::Applied);
    assert_eq!(result.field_errors.len(), 1);
    assert_eq!(library.get("a").unwrap().get("#pages"), Some(&ColumnValue::Int(300)));
    assert_eq!(library.get("a").unwrap().get("#review"), None);
}

// ============================================================================
// Property Tests
// ============================================================================

fn arb_key() -> impl Strategy<Value = Key> {
    prop_oneof![
        (-5i64..50).prop_map(Key::Int),
        "[a-z_][a-z0-9_]{0,8}".prop_map(Key::Str),
        any::<String>().prop_map(Key::Str),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(Value::Float),
        any::<String>().prop_map(Value::Str),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(|items| Value::sequence(items)),
            prop::collection::vec((arb_key(), inner), 0..8).prop_map(|entries| Value::table(entries)),
        ]
    })
}

proptest! {
    #[test]
    fn prop_encode_decode_roundtrip(value in arb_value()) {
        prop_assert_eq!(decode(&encode(&value)).unwrap(), value.clone());
        prop_assert_eq!(decode(&encode_sidecar(&value)).unwrap(), value);
    }

    #[test]
    fn prop_decode_never_panics(text in ".{0,200}") {
        let _ = decode(&text);
    }

    #[test]
    fn prop_decode_errors_point_inside_input(text in "[{}\\[\\]=,'\"a-z0-9 \n-]{0,60}") {
        if let Err(e) = decode(&text) {
            prop_assert!(e.line >= 1);
            prop_assert!(e.column >= 1);
            prop_assert!(e.line <= text.lines().count().max(1) + 1);
        }
    }
}
