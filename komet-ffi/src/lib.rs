//! C-compatible FFI wrappers around komet-core.
//!
//! All functions take C strings (plain paths or `file://` URLs) and return
//! JSON for structured values. Callers must free returned strings with
//! `komet_free_string`.
//!
//! Every extern "C" function is wrapped in `ffi_catch` so Rust panics never
//! cross the FFI boundary.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use komet_core::incomplete::IncompleteCommitStore;
use komet_core::util::{project_name, target_path_from_arg};
use komet_core::{preferences, text, BreadcrumbStore, Breadcrumbs, EditSession, Preferences};

/// Run `f` inside `catch_unwind`, logging the panic payload before returning the
/// fallback value.
fn ffi_catch<T>(fallback: T, f: impl FnOnce() -> T + std::panic::UnwindSafe) -> T {
    match catch_unwind(f) {
        Ok(v) => v,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            log::error!("FFI panic caught: {}", msg);
            fallback
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_rust_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: Caller guarantees `ptr` is a valid, null-terminated C string
    // whose memory remains valid for the duration of this call.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(String::from)
}

fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => {
            log::warn!("String contains interior NUL bytes, sanitizing ({} bytes)", s.len());
            let sanitized: String = s.chars().filter(|&c| c != '\0').collect();
            CString::new(sanitized).unwrap_or_default().into_raw()
        }
    }
}

fn to_json_c_string(value: &impl serde::Serialize) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_c_string(&json),
        Err(e) => {
            log::error!("JSON serialization failed: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Store configured from the user's preferences, unless the caller overrides
/// the timeout (`timeout_secs >= 0`).
fn configured_store(timeout_secs: f64) -> Option<BreadcrumbStore> {
    let mut prefs = preferences::load();
    if timeout_secs >= 0.0 {
        prefs.resume_incomplete_session_timeout_secs = timeout_secs;
    }
    let store = BreadcrumbStore::from_preferences(&prefs);
    if store.is_none() {
        log::error!("Cannot determine a data directory for breadcrumbs");
    }
    store
}

fn breadcrumbs_json(store: &BreadcrumbStore, target: &Path) -> Option<String> {
    let file = store.load(target)?;
    let json = serde_json::json!({
        "target": file.target().to_string_lossy(),
        "location": file.location().to_string_lossy(),
        "record": file.record(),
    });
    Some(json.to_string())
}

fn save_breadcrumbs_json(store: &BreadcrumbStore, target: &Path, record_json: &str) -> Result<(), String> {
    let record: Breadcrumbs =
        serde_json::from_str(record_json).map_err(|e| format!("Invalid breadcrumbs JSON: {}", e))?;
    let mut file = store.create(target);
    *file = record;
    store.save(&file).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Memory management
// ---------------------------------------------------------------------------

/// Free a string previously returned by a `komet_*` function.
#[no_mangle]
pub extern "C" fn komet_free_string(s: *mut c_char) {
    ffi_catch(
        (),
        AssertUnwindSafe(|| {
            if !s.is_null() {
                // SAFETY: `s` was previously returned by `CString::into_raw` from
                // one of the `komet_*` functions, so it is valid to reclaim it.
                unsafe {
                    drop(CString::from_raw(s));
                }
            }
        }),
    )
}

// ---------------------------------------------------------------------------
// Breadcrumbs
// ---------------------------------------------------------------------------

/// Storage location of the breadcrumbs for `target`.
///
/// Returns null on invalid input. The caller must free the returned string
/// with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_breadcrumbs_path(target: *const c_char) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let target = match to_rust_str(target) {
                Some(s) => target_path_from_arg(&s),
                None => return std::ptr::null_mut(),
            };
            match configured_store(-1.0) {
                Some(store) => to_c_string(&store.path_for(&target).to_string_lossy()),
                None => std::ptr::null_mut(),
            }
        }),
    )
}

/// Load resumable breadcrumbs for `target`.
///
/// A negative `timeout_secs` uses the timeout from preferences. Returns a JSON
/// object `{"target", "location", "record"}`, or null when there is nothing to
/// resume. The caller must free the returned string with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_breadcrumbs_load(target: *const c_char, timeout_secs: f64) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let target = match to_rust_str(target) {
                Some(s) => target_path_from_arg(&s),
                None => return std::ptr::null_mut(),
            };
            configured_store(timeout_secs)
                .and_then(|store| breadcrumbs_json(&store, &target))
                .map(|json| to_c_string(&json))
                .unwrap_or(std::ptr::null_mut())
        }),
    )
}

/// Save `record_json` (a breadcrumbs record) for `target`.
///
/// Returns 0 on success or -1 on error.
#[no_mangle]
pub extern "C" fn komet_breadcrumbs_save(target: *const c_char, record_json: *const c_char) -> i32 {
    ffi_catch(
        -1,
        AssertUnwindSafe(|| {
            let target = match to_rust_str(target) {
                Some(s) => target_path_from_arg(&s),
                None => return -1,
            };
            let record_json = match to_rust_str(record_json) {
                Some(s) => s,
                None => return -1,
            };
            let Some(store) = configured_store(-1.0) else {
                return -1;
            };
            match save_breadcrumbs_json(&store, &target, &record_json) {
                Ok(()) => 0,
                Err(e) => {
                    log::warn!("Failed to save breadcrumbs for {:?}: {}", target, e);
                    -1
                }
            }
        }),
    )
}

/// Remove any breadcrumbs for `target`.
///
/// Returns 0 on success (including when nothing was stored) or -1 on error.
#[no_mangle]
pub extern "C" fn komet_breadcrumbs_discard(target: *const c_char) -> i32 {
    ffi_catch(
        -1,
        AssertUnwindSafe(|| {
            let target = match to_rust_str(target) {
                Some(s) => target_path_from_arg(&s),
                None => return -1,
            };
            let Some(store) = configured_store(-1.0) else {
                return -1;
            };
            match store.discard(&target) {
                Ok(()) => 0,
                Err(e) => {
                    log::warn!("{}", e);
                    -1
                }
            }
        }),
    )
}

// ---------------------------------------------------------------------------
// Edit sessions
// ---------------------------------------------------------------------------

/// Registry mapping handle addresses to live sessions. The pointer handed to
/// C is only ever used as a key.
fn session_registry() -> &'static parking_lot::Mutex<HashMap<usize, Arc<EditSession>>> {
    static REGISTRY: OnceLock<parking_lot::Mutex<HashMap<usize, Arc<EditSession>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| parking_lot::Mutex::new(HashMap::new()))
}

fn with_session<T>(handle: *mut SessionHandle, default: T, f: impl FnOnce(&EditSession) -> T) -> T {
    if handle.is_null() {
        return default;
    }
    let session = session_registry().lock().get(&(handle as usize)).cloned();
    match session {
        Some(session) => f(&session),
        None => {
            log::warn!("Attempted to use invalid or freed session handle");
            default
        }
    }
}

/// Opaque handle token for the C API. Never dereferenced.
pub struct SessionHandle {
    _private: (),
}

/// Start (or resume) an edit session for `target`.
///
/// Returns an opaque handle that must be released with `komet_session_free`,
/// or null on error.
#[no_mangle]
pub extern "C" fn komet_session_start(target: *const c_char) -> *mut SessionHandle {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let target = match to_rust_str(target) {
                Some(s) => target_path_from_arg(&s),
                None => return std::ptr::null_mut(),
            };
            let Some(store) = configured_store(-1.0) else {
                return std::ptr::null_mut();
            };
            let session = Arc::new(EditSession::start(Arc::new(store), &target));
            let handle = Box::into_raw(Box::new(SessionHandle { _private: () }));
            session_registry().lock().insert(handle as usize, session);
            handle
        }),
    )
}

/// Current record of the session as JSON, with `"resumed"` and
/// `"resumed_exit_status"` describing where it came from.
///
/// The caller must free the returned string with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_session_snapshot(handle: *mut SessionHandle) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            with_session(handle, std::ptr::null_mut(), |session| {
                let snapshot = session.snapshot();
                to_json_c_string(&serde_json::json!({
                    "target": snapshot.target().to_string_lossy(),
                    "resumed": session.resumed(),
                    "resumed_exit_status": session.resumed_exit_status(),
                    "record": snapshot.record(),
                }))
            })
        }),
    )
}

/// Analyze the current editor `text`, record the resulting ranges in the
/// session, and return the analysis as JSON.
///
/// The caller must free the returned string with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_session_analyze(handle: *mut SessionHandle, text: *const c_char) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let text = match to_rust_str(text) {
                Some(s) => s,
                None => return std::ptr::null_mut(),
            };
            with_session(handle, std::ptr::null_mut(), |session| {
                let report = text::analyze(&session.target(), &text, &preferences::load());
                session.record_analysis(&report);
                to_json_c_string(&report)
            })
        }),
    )
}

#[no_mangle]
pub extern "C" fn komet_session_set_spell_checking(handle: *mut SessionHandle, enabled: bool) {
    ffi_catch(
        (),
        AssertUnwindSafe(|| with_session(handle, (), |session| session.set_spell_checking(enabled))),
    )
}

/// Save a snapshot of the session on a worker thread. Failures are logged.
#[no_mangle]
pub extern "C" fn komet_session_save_in_background(handle: *mut SessionHandle) {
    ffi_catch(
        (),
        AssertUnwindSafe(|| {
            with_session(handle, (), |session| {
                // Dropping the handle detaches the writer.
                drop(session.save_in_background());
            })
        }),
    )
}

/// Record the editor's exit status: 0 discards the breadcrumbs, anything else
/// keeps them for the next session.
///
/// Returns 0 on success or -1 on error.
#[no_mangle]
pub extern "C" fn komet_session_finish(handle: *mut SessionHandle, exit_status: i32) -> i32 {
    ffi_catch(
        -1,
        AssertUnwindSafe(|| {
            with_session(handle, -1, |session| match session.finish(exit_status) {
                Ok(()) => 0,
                Err(e) => {
                    log::warn!("Failed to finish session: {}", e);
                    -1
                }
            })
        }),
    )
}

/// Release a session handle returned by `komet_session_start`.
#[no_mangle]
pub extern "C" fn komet_session_free(handle: *mut SessionHandle) {
    ffi_catch(
        (),
        AssertUnwindSafe(|| {
            if handle.is_null() {
                return;
            }
            if session_registry().lock().remove(&(handle as usize)).is_some() {
                // SAFETY: `handle` was produced by `Box::into_raw` in
                // `komet_session_start` and was still registered, so it has not
                // been freed yet.
                unsafe {
                    drop(Box::from_raw(handle));
                }
            } else {
                log::warn!("Attempted to free an unknown session handle");
            }
        }),
    )
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Current preferences (defaults filled in) as JSON.
///
/// The caller must free the returned string with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_preferences_load() -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| to_json_c_string(&preferences::load())),
    )
}

/// Replace the stored preferences with `json`.
///
/// Returns 0 on success or -1 on error.
#[no_mangle]
pub extern "C" fn komet_preferences_save(json: *const c_char) -> i32 {
    ffi_catch(
        -1,
        AssertUnwindSafe(|| {
            let json = match to_rust_str(json) {
                Some(s) => s,
                None => return -1,
            };
            let prefs: Preferences = match serde_json::from_str(&json) {
                Ok(prefs) => prefs,
                Err(e) => {
                    log::warn!("Invalid preferences JSON: {}", e);
                    return -1;
                }
            };
            match preferences::save(&prefs) {
                Ok(()) => 0,
                Err(e) => {
                    log::warn!("{}", e);
                    -1
                }
            }
        }),
    )
}

// ---------------------------------------------------------------------------
// Incomplete commits
// ---------------------------------------------------------------------------

/// Project key for incomplete commits: the last component of the directory
/// the commit was started in.
fn project_from_arg(working_dir: *const c_char) -> Option<String> {
    project_name(&target_path_from_arg(&to_rust_str(working_dir)?))
}

/// Keep an abandoned commit message for the project in `working_dir`.
///
/// Returns 1 if it was saved, 0 if it was blank, or -1 on error.
#[no_mangle]
pub extern "C" fn komet_incomplete_commit_save(working_dir: *const c_char, message: *const c_char) -> i32 {
    ffi_catch(
        -1,
        AssertUnwindSafe(|| {
            let Some(project) = project_from_arg(working_dir) else {
                return -1;
            };
            let message = match to_rust_str(message) {
                Some(s) => s,
                None => return -1,
            };
            let Some(root) = IncompleteCommitStore::default_root() else {
                return -1;
            };
            match IncompleteCommitStore::new(root).save(&project, &message) {
                Ok(true) => 1,
                Ok(false) => 0,
                Err(e) => {
                    log::warn!("{}", e);
                    -1
                }
            }
        }),
    )
}

/// Take the abandoned commit message for the project in `working_dir`, if
/// resuming is enabled and it is recent enough.
///
/// Returns null when there is nothing to resume. The caller must free the
/// returned string with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_incomplete_commit_take(working_dir: *const c_char) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let Some(project) = project_from_arg(working_dir) else {
                return std::ptr::null_mut();
            };
            let Some(root) = IncompleteCommitStore::default_root() else {
                return std::ptr::null_mut();
            };
            let policy = preferences::load().resume_policy();
            match IncompleteCommitStore::new(root).take(&project, policy) {
                Some(message) => to_c_string(&message),
                None => std::ptr::null_mut(),
            }
        }),
    )
}

// ---------------------------------------------------------------------------
// Commit text
// ---------------------------------------------------------------------------

/// Analyze the commit message `text` of the file at `path`.
///
/// Returns a JSON `CommitTextReport`. The caller must free the returned string
/// with `komet_free_string`.
#[no_mangle]
pub extern "C" fn komet_analyze_commit_text(path: *const c_char, text: *const c_char) -> *mut c_char {
    ffi_catch(
        std::ptr::null_mut(),
        AssertUnwindSafe(|| {
            let path = match to_rust_str(path) {
                Some(s) => target_path_from_arg(&s),
                None => return std::ptr::null_mut(),
            };
            let text = match to_rust_str(text) {
                Some(s) => s,
                None => return std::ptr::null_mut(),
            };
            to_json_c_string(&text::analyze(&path, &text, &preferences::load()))
        }),
    )
}
