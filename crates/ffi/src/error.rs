use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::ptr;

use hydra_core::ErosionError;

/// Anything the C boundary can report: a code plus a diagnostic message.
pub(crate) trait HydraError {
    fn code(&self) -> HydraErrorCode;
    fn msg(&self) -> &str;
}

/// Error raised inside the FFI layer.
///
/// Argument checks build one through the named constructors; engine errors
/// arrive through `From<ErosionError>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DefaultHydraError {
    code: HydraErrorCode,
    msg: String,
}

impl DefaultHydraError {
    pub fn null_pointer(param_name: &str) -> Self {
        Self {
            code: HydraErrorCode::NullPointer,
            msg: format!("'{param_name}' must not be null"),
        }
    }

    pub fn lock_poisoned(lock_name: &str) -> Self {
        Self {
            code: HydraErrorCode::LockPoisoned,
            msg: format!("{lock_name} is unusable after a panic while it was held"),
        }
    }

    /// `message` says what was wrong with `param_name`.
    pub fn invalid_parameter(param_name: &str, message: &str) -> Self {
        Self {
            code: HydraErrorCode::InvalidParameter,
            msg: format!("Parameter '{param_name}': {message}"),
        }
    }

    pub fn unknown_target(target: u32) -> Self {
        Self {
            code: HydraErrorCode::UnknownTarget,
            msg: format!("No target with handle {target}"),
        }
    }
}

impl From<ErosionError> for DefaultHydraError {
    fn from(error: ErosionError) -> Self {
        let code = match &error {
            ErosionError::ResourceExhausted { .. } => HydraErrorCode::ResourceExhausted,
            ErosionError::InvalidSource(_) => HydraErrorCode::InvalidSource,
            ErosionError::UnsupportedChannelCount(_) => HydraErrorCode::UnsupportedChannelCount,
            ErosionError::ExternalAssetMissing(_) => HydraErrorCode::ExternalAssetMissing,
            ErosionError::Config(_) => HydraErrorCode::InvalidParameter,
            ErosionError::Backend(_) => HydraErrorCode::Backend,
        };
        Self {
            code,
            msg: error.to_string(),
        }
    }
}

impl HydraError for DefaultHydraError {
    fn code(&self) -> HydraErrorCode {
        self.code
    }

    fn msg(&self) -> &str {
        &self.msg
    }
}

impl From<DefaultHydraError> for HydraErrorCode {
    fn from(error: DefaultHydraError) -> Self {
        error.code
    }
}

/// Status of every fallible `hydra_*` call; zero is success.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydraErrorCode {
    Ok = 0,
    /// A required pointer argument was null.
    NullPointer = 1,
    /// The instance mutex was poisoned by an earlier panic.
    LockPoisoned = 2,
    /// Bad size, non-UTF-8 string or malformed JSON.
    InvalidParameter = 3,
    /// The target handle was never issued or was already released.
    UnknownTarget = 4,
    /// An allocation would exceed the configured memory budget.
    ResourceExhausted = 5,
    /// The target has no usable geometry or lacks a required map.
    InvalidSource = 6,
    /// A field had a channel count other than 1 or 4.
    UnsupportedChannelCount = 7,
    /// A named image is not in the library.
    ExternalAssetMissing = 8,
    /// The compute backend failed.
    Backend = 9,
}

/// Last failure seen on one thread.
///
/// The message is kept as a `CString` so the pointer handed to C stays valid
/// until the next call on the same thread.
struct LastError {
    message: Option<CString>,
    code: HydraErrorCode,
}

thread_local! {
    static LAST_ERROR: RefCell<LastError> = const {
        RefCell::new(LastError { message: None, code: HydraErrorCode::Ok })
    };
}

pub(crate) fn store_last_error(error: &impl HydraError) {
    LAST_ERROR.with_borrow_mut(|last| {
        last.message = CString::new(error.msg()).ok();
        last.code = error.code();
    });
}

pub(crate) fn reset_last_error() {
    LAST_ERROR.with_borrow_mut(|last| {
        last.message = None;
        last.code = HydraErrorCode::Ok;
    });
}

/// Message of the last failed call on this thread, or null after a success.
///
/// The string is owned by the library and stays valid until the next
/// `hydra_*` call on the same thread. Do not free it.
///
/// ```c
/// if (hydra_erode_pipe(engine, target) != Ok) {
///     const char *why = hydra_get_last_error();
///     fprintf(stderr, "pipe erosion: %s\n", why ? why : "unknown");
/// }
/// ```
#[no_mangle]
pub extern "C" fn hydra_get_last_error() -> *const c_char {
    LAST_ERROR.with_borrow(|last| last.message.as_ref().map_or(ptr::null(), |m| m.as_ptr()))
}

/// Code of the last call on this thread; `Ok` when it succeeded.
#[no_mangle]
pub extern "C" fn hydra_get_last_error_code() -> HydraErrorCode {
    LAST_ERROR.with_borrow(|last| last.code)
}
