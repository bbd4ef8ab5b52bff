//! FFI bindings for Soomi Engine
//!
//! This module provides C-compatible functions for driving a session from a host
//! app. Strings are null-terminated UTF-8. Every returned string is allocated
//! here and must be released with `soomi_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use serde::Serialize;

use crate::config::SoomiConfig;
use crate::session::SoomiSession;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn to_json_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Borrow the session behind a handle, recording an error for NULL
unsafe fn session_ref<'a>(handle: *const SoomiSessionHandle) -> Option<&'a SoomiSession> {
    if handle.is_null() {
        set_last_error("Null session pointer");
        return None;
    }
    Some(&(*handle).session)
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Opaque handle to a SoomiSession
pub struct SoomiSessionHandle {
    session: SoomiSession,
}

/// Create a session.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `soomi_session_free`.
/// - Returns NULL on error; call `soomi_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_new(config_json: *const c_char) -> *mut SoomiSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        SoomiConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string");
                return ptr::null_mut();
            }
        };
        match SoomiConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match SoomiSession::new(config) {
        Ok(session) => Box::into_raw(Box::new(SoomiSessionHandle { session })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session. Any open intervention is closed first.
///
/// # Safety
/// - `handle` must be a pointer returned by `soomi_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_free(handle: *mut SoomiSessionHandle) {
    if !handle.is_null() {
        let handle = Box::from_raw(handle);
        handle.session.stop();
    }
}

macro_rules! control_fn {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        ///
        /// # Safety
        /// - `handle` must be a valid pointer returned by `soomi_session_new`.
        /// - Returns a JSON outcome that must be freed with `soomi_free_string`.
        /// - Returns NULL on error; call `soomi_last_error` to get the error message.
        #[no_mangle]
        pub unsafe extern "C" fn $name(handle: *mut SoomiSessionHandle) -> *mut c_char {
            clear_last_error();
            match session_ref(handle) {
                Some(session) => to_json_cstr(&session.$method()),
                None => ptr::null_mut(),
            }
        }
    };
}

control_fn!(
    /// Start monitoring.
    soomi_session_start,
    start
);
control_fn!(
    /// Stop monitoring, closing any open intervention.
    soomi_session_stop,
    stop
);
control_fn!(
    /// Panic: silence output and pause.
    soomi_session_force_stop,
    force_stop
);
control_fn!(
    /// Leave the paused state.
    soomi_session_resume,
    resume
);
control_fn!(
    /// Start soothing now, regardless of the score.
    soomi_session_manual_soothe,
    manual_soothe
);

// ============================================================================
// Audio input
// ============================================================================

/// Process one window of 16-bit PCM samples.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - `samples` must point to `len` readable `i16` values (may be NULL when `len` is 0).
/// - Returns a JSON tick that must be freed with `soomi_free_string`.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_process_pcm16(
    handle: *mut SoomiSessionHandle,
    samples: *const i16,
    len: usize,
) -> *mut c_char {
    clear_last_error();

    let Some(session) = session_ref(handle) else {
        return ptr::null_mut();
    };
    let samples: &[i16] = if samples.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(samples, len)
    };

    to_json_cstr(&session.process_pcm16(samples))
}

/// Process one window of float samples in [-1, 1].
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - `samples` must point to `len` readable `f32` values (may be NULL when `len` is 0).
/// - Returns a JSON tick that must be freed with `soomi_free_string`.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_process_f32(
    handle: *mut SoomiSessionHandle,
    samples: *const f32,
    len: usize,
) -> *mut c_char {
    clear_last_error();

    let Some(session) = session_ref(handle) else {
        return ptr::null_mut();
    };
    let samples: &[f32] = if samples.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(samples, len)
    };

    to_json_cstr(&session.process_window(samples))
}

/// Feed an externally computed unrest score (0-100).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - Returns a JSON tick that must be freed with `soomi_free_string`.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_process_score(
    handle: *mut SoomiSessionHandle,
    score: f64,
) -> *mut c_char {
    clear_last_error();
    match session_ref(handle) {
        Some(session) => to_json_cstr(&session.process_score(score)),
        None => ptr::null_mut(),
    }
}

// ============================================================================
// State and configuration
// ============================================================================

/// Note that the baby was just fed.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - Returns 0 on success, -1 for a NULL handle.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_mark_feed(handle: *mut SoomiSessionHandle) -> i32 {
    clear_last_error();
    match session_ref(handle) {
        Some(session) => {
            session.mark_feed();
            0
        }
        None => -1,
    }
}

/// Snapshot of the session state as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - Returns a string that must be freed with `soomi_free_string`.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_snapshot(handle: *mut SoomiSessionHandle) -> *mut c_char {
    clear_last_error();
    match session_ref(handle) {
        Some(session) => to_json_cstr(&session.snapshot()),
        None => ptr::null_mut(),
    }
}

/// Replace the session configuration. Out-of-range values are clamped.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - `config_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error; call `soomi_last_error` for details.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_set_config(
    handle: *mut SoomiSessionHandle,
    config_json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(session) = session_ref(handle) else {
        return -1;
    };
    let json = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string");
            return -1;
        }
    };

    match SoomiConfig::from_json(&json) {
        Ok(config) => {
            session.set_config(config);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Save learned profiles to JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - Returns a string that must be freed with `soomi_free_string`.
/// - Returns NULL on error; call `soomi_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_save_profiles(
    handle: *mut SoomiSessionHandle,
) -> *mut c_char {
    clear_last_error();

    let Some(session) = session_ref(handle) else {
        return ptr::null_mut();
    };
    match session.export_profiles() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Load learned profiles from JSON, replacing the current table.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `soomi_session_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error; call `soomi_last_error` for details.
#[no_mangle]
pub unsafe extern "C" fn soomi_session_load_profiles(
    handle: *mut SoomiSessionHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(session) = session_ref(handle) else {
        return -1;
    };
    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match session.import_profiles(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Soomi functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Soomi function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn soomi_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Soomi function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn soomi_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the engine version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn soomi_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take_json(ptr: *mut c_char) -> serde_json::Value {
        assert!(!ptr.is_null());
        let value = serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap();
        soomi_free_string(ptr);
        value
    }

    #[test]
    fn test_ffi_session_lifecycle() {
        unsafe {
            let session = soomi_session_new(ptr::null());
            assert!(!session.is_null());

            let started = take_json(soomi_session_start(session));
            assert_eq!(started["state"], "LISTENING");
            assert_eq!(started["command"]["command"], "silence");

            let samples = vec![0i16; 16_000];
            let tick = take_json(soomi_session_process_pcm16(
                session,
                samples.as_ptr(),
                samples.len(),
            ));
            assert_eq!(tick["zone"], "CALM");
            assert!(tick["score"]["value"].as_f64().unwrap() < 10.0);

            let soothing = take_json(soomi_session_manual_soothe(session));
            assert_eq!(soothing["state"], "SOOTHING");

            let paused = take_json(soomi_session_force_stop(session));
            assert_eq!(paused["state"], "PAUSED");
            assert_eq!(paused["command"]["command"], "force_stop");
            assert_eq!(paused["closed_events"].as_array().unwrap().len(), 1);

            let snapshot = take_json(soomi_session_snapshot(session));
            assert_eq!(snapshot["machine"]["state"], "PAUSED");

            soomi_session_free(session);
        }
    }

    #[test]
    fn test_ffi_profiles_round_trip() {
        unsafe {
            let a = soomi_session_new(ptr::null());
            take_json(soomi_session_start(a));
            take_json(soomi_session_manual_soothe(a));
            take_json(soomi_session_stop(a));

            let saved = soomi_session_save_profiles(a);
            assert!(!saved.is_null());

            let b = soomi_session_new(ptr::null());
            assert_eq!(soomi_session_load_profiles(b, saved), 0);

            soomi_free_string(saved);
            soomi_session_free(a);
            soomi_session_free(b);
        }
    }

    #[test]
    fn test_ffi_config() {
        unsafe {
            let config = CString::new(r#"{"intervention":{"start_threshold":70.0}}"#).unwrap();
            let session = soomi_session_new(config.as_ptr());
            assert!(!session.is_null());
            assert_eq!(soomi_session_set_config(session, config.as_ptr()), 0);
            assert_eq!(soomi_session_mark_feed(session), 0);
            soomi_session_free(session);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let session = soomi_session_new(invalid.as_ptr());
            assert!(session.is_null());

            let error = soomi_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            assert!(soomi_session_start(ptr::null_mut()).is_null());
            assert_eq!(soomi_session_mark_feed(ptr::null_mut()), -1);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = soomi_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
