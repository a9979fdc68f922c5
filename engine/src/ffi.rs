//! FFI layer for the host plugin.
//!
//! C-compatible functions for hosts that load the engine as a shared
//! library. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `sidecar_*` functions are allocated by Rust
//! - Caller must free them with `sidecar_string_free`
//! - `sidecar_version` returns a static string that must not be freed
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{
    decode::decode, device::sidecar_path, encode::encode_sidecar, reconcile::reconcile,
    BindingSet, DeviceBook, DeviceSupport, LibrarySet, SyncPolicy, SyncReport, Value,
};
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};

/// Result wrapper for FFI responses.
#[derive(Serialize)]
#[serde(untagged)]
enum FfiResult<T: Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `sidecar_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .unwrap_or_default()
            .into_raw(),
    }
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn respond<T: Serialize>(result: FfiResult<T>) -> *mut c_char {
    to_c_string(result.to_json())
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `sidecar_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn sidecar_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Literal Codec
// ============================================================================

/// Decode sidecar text.
///
/// # Returns
/// JSON string: `{"ok": <value tree>}` or `{"error": "message"}`
///
/// # Safety
/// - `text` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `sidecar_string_free`
#[no_mangle]
pub unsafe extern "C" fn sidecar_decode(text: *const c_char) -> *mut c_char {
    let Some(text) = from_c_string(text) else {
        return respond(FfiResult::<()>::err("invalid sidecar text"));
    };

    match decode(&text) {
        Ok(value) => respond(FfiResult::ok(value)),
        Err(e) => respond(FfiResult::<()>::err(e.to_string())),
    }
}

/// Encode a value tree, given as JSON, as a complete sidecar file.
///
/// # Returns
/// JSON string: `{"ok": "<sidecar text>"}` or `{"error": "message"}`
///
/// # Safety
/// - `value_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `sidecar_string_free`
#[no_mangle]
pub unsafe extern "C" fn sidecar_encode(value_json: *const c_char) -> *mut c_char {
    let Some(value_str) = from_c_string(value_json) else {
        return respond(FfiResult::<()>::err("invalid value JSON"));
    };

    match serde_json::from_str::<Value>(&value_str) {
        Ok(value) => respond(FfiResult::ok(encode_sidecar(&value))),
        Err(e) => respond(FfiResult::<()>::err(format!("parse error: {}", e))),
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Arguments of `sidecar_reconcile`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileRequest {
    batch: Vec<DeviceBook>,
    #[serde(default)]
    library: LibrarySet,
    #[serde(default)]
    policy: SyncPolicy,
    #[serde(default)]
    bindings: BindingSet,
}

/// Result of `sidecar_reconcile`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileResponse {
    report: SyncReport,
    /// The library after the writes of this call
    library: LibrarySet,
}

/// Reconcile a batch of device books against library records.
///
/// # Arguments
/// - `request_json`: `{"batch": [...], "library": {...}, "policy": {...},
///   "bindings": {...}}`
///
/// # Returns
/// JSON string: `{"ok": {"report": SyncReport, "library": LibrarySet}}` or
/// `{"error": "message"}`
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `sidecar_string_free`
#[no_mangle]
pub unsafe extern "C" fn sidecar_reconcile(request_json: *const c_char) -> *mut c_char {
    let Some(request_str) = from_c_string(request_json) else {
        return respond(FfiResult::<()>::err("invalid request JSON"));
    };

    let request: ReconcileRequest = match serde_json::from_str(&request_str) {
        Ok(request) => request,
        Err(e) => return respond(FfiResult::<()>::err(format!("parse error: {}", e))),
    };

    let mut library = request.library;
    match reconcile(&request.batch, &mut library, &request.policy, &request.bindings) {
        Ok(report) => respond(FfiResult::ok(ReconcileResponse { report, library })),
        Err(e) => respond(FfiResult::<()>::err(e.to_string())),
    }
}

// ============================================================================
// Device
// ============================================================================

/// Sidecar path for a book path on the device.
///
/// # Returns
/// JSON string: `{"ok": "<path>"}` or `{"error": "message"}`
///
/// # Safety
/// - `book_path` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `sidecar_string_free`
#[no_mangle]
pub unsafe extern "C" fn sidecar_path_for(book_path: *const c_char) -> *mut c_char {
    match from_c_string(book_path) {
        Some(path) => respond(FfiResult::ok(sidecar_path(&path))),
        None => respond(FfiResult::<()>::err("invalid book path")),
    }
}

/// Support level of a device driver.
///
/// # Returns
/// JSON string: `{"ok": "supported" | "unsupported" | "untested"}` or
/// `{"error": "message"}`
///
/// # Safety
/// - `driver` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `sidecar_string_free`
#[no_mangle]
pub unsafe extern "C" fn sidecar_device_support(driver: *const c_char) -> *mut c_char {
    match from_c_string(driver) {
        Some(driver) => respond(FfiResult::ok(DeviceSupport::classify(&driver))),
        None => respond(FfiResult::<()>::err("invalid driver name")),
    }
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn sidecar_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
