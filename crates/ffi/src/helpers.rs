use std::ffi::{c_char, CStr};
use std::sync::MutexGuard;

use crate::error::{reset_last_error, store_last_error, DefaultHydraError, HydraError, HydraErrorCode};
use crate::instance::{EngineState, HydraInstance};

/// Record `error` as this thread's last error and return its code.
pub(crate) fn track_error(error: &impl HydraError) -> HydraErrorCode {
    tracing::debug!(code = ?error.code(), "FFI call failed: {}", error.msg());
    store_last_error(error);
    error.code()
}

/// Run `f`, recording its error (or clearing the last error) and returning the code.
pub(crate) fn track_result(f: impl FnOnce() -> Result<(), DefaultHydraError>) -> HydraErrorCode {
    match f() {
        Ok(()) => {
            reset_last_error();
            HydraErrorCode::Ok
        }
        Err(error) => track_error(&error),
    }
}

/// Borrow an instance from a raw pointer, rejecting null.
pub(crate) fn instance_from_ptr<'a>(
    ptr: *const HydraInstance,
) -> Result<&'a HydraInstance, DefaultHydraError> {
    // SAFETY: the caller guarantees `ptr` came from `hydra_engine_create`
    // and has not been destroyed; null is rejected here.
    unsafe { ptr.as_ref() }.ok_or_else(|| DefaultHydraError::null_pointer("instance"))
}

/// Lock the engine state of an instance.
pub(crate) fn lock_state(
    instance: &HydraInstance,
) -> Result<MutexGuard<'_, EngineState>, DefaultHydraError> {
    instance
        .state
        .lock()
        .map_err(|_| DefaultHydraError::lock_poisoned("EngineState"))
}

/// Read an optional UTF-8 C string; null maps to `None`.
///
/// # Safety
/// A non-null `ptr` must point to a null-terminated string.
pub(crate) unsafe fn optional_str<'a>(
    ptr: *const c_char,
    param_name: &str,
) -> Result<Option<&'a str>, DefaultHydraError> {
    if ptr.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null and null-terminated per the function contract.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str()
        .map(Some)
        .map_err(|_| DefaultHydraError::invalid_parameter(param_name, "must be valid UTF-8"))
}

/// Read a required UTF-8 C string.
///
/// # Safety
/// Same contract as [`optional_str`].
pub(crate) unsafe fn required_str<'a>(
    ptr: *const c_char,
    param_name: &str,
) -> Result<&'a str, DefaultHydraError> {
    unsafe { optional_str(ptr, param_name) }?
        .ok_or_else(|| DefaultHydraError::null_pointer(param_name))
}

/// Number of floats in an RGBA buffer, checked for overflow and zero size.
pub(crate) fn rgba_len(width: u32, height: u32) -> Result<usize, DefaultHydraError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            DefaultHydraError::invalid_parameter(
                "width/height",
                &format!("invalid image size {width}x{height}"),
            )
        })
}
