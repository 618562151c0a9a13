use std::ffi::c_char;
use std::ptr;
use std::sync::Mutex;

use hydra_core::{EngineConfig, EngineContext, ImageTarget};
use rustc_hash::FxHashMap;

use crate::error::{DefaultHydraError, HydraErrorCode};
use crate::helpers::{optional_str, track_error, track_result};

/// Engine plus the targets created through the C API.
pub(crate) struct EngineState {
    pub(crate) engine: EngineContext,
    pub(crate) targets: FxHashMap<u32, ImageTarget>,
    next_target: u32,
}

impl EngineState {
    /// Register a target and return its handle (never 0).
    pub(crate) fn add_target(&mut self, target: ImageTarget) -> u32 {
        self.next_target = self.next_target.wrapping_add(1).max(1);
        let handle = self.next_target;
        self.targets.insert(handle, target);
        handle
    }

    /// Run `f` on the engine and one target.
    pub(crate) fn with_target<T>(
        &mut self,
        handle: u32,
        f: impl FnOnce(&mut EngineContext, &mut ImageTarget) -> T,
    ) -> Result<T, DefaultHydraError> {
        let target = self
            .targets
            .get_mut(&handle)
            .ok_or_else(|| DefaultHydraError::unknown_target(handle))?;
        Ok(f(&mut self.engine, target))
    }
}

/// An erosion engine owned by C code.
///
/// # Thread Safety
/// The engine state sits behind a `Mutex`: calls from several threads are
/// serialized. Solvers are long-running, so hosts usually drive one instance
/// from a worker thread and poll results from the main thread.
///
/// # Usage (C++)
/// ```cpp
/// HydraInstance* engine = nullptr;
/// if (hydra_engine_create("{\"backend\":\"auto\"}", &engine) != HydraErrorCode::Ok) {
///     fprintf(stderr, "%s\n", hydra_get_last_error());
///     return;
/// }
/// uint32_t terrain = 0;
/// hydra_target_from_pixels(engine, "terrain", width, height, rgba, &terrain);
/// hydra_erode_thermal(engine, terrain);
/// hydra_target_read_result(engine, terrain, heights, width * height);
/// hydra_engine_destroy(engine);
/// ```
pub struct HydraInstance {
    pub(crate) state: Mutex<EngineState>,
}

impl HydraInstance {
    /// Creates a new instance from an optional JSON engine configuration.
    pub(crate) fn new(config_json: Option<&str>) -> Result<Box<Self>, DefaultHydraError> {
        let config = match config_json {
            Some(json) => EngineConfig::from_json(json)?,
            None => EngineConfig::default(),
        };
        Ok(Box::new(Self {
            state: Mutex::new(EngineState {
                engine: EngineContext::new(config),
                targets: FxHashMap::default(),
                next_target: 0,
            }),
        }))
    }
}

/// Create a new engine and return it via out-parameter.
///
/// Parameters
/// - `config_json`: engine configuration as JSON (`history_length`,
///   `memory_budget_bytes`, `backend`, `seed`). May be null for defaults.
/// - `out_instance`: pointer to receive the created instance. Must be non-null.
///   Set to null on failure.
///
/// Returns
/// - `HydraErrorCode::Ok` (0): success
/// - `HydraErrorCode::NullPointer`: `out_instance` is null
/// - `HydraErrorCode::InvalidParameter`: the JSON is not valid UTF-8 or does not parse
///
/// # Safety
///
/// - `out_instance` must be a valid pointer to writable memory.
/// - `config_json` must be null or point to a null-terminated string.
/// - The caller takes ownership of the instance and MUST call `hydra_engine_destroy`
///   exactly once.
#[no_mangle]
pub unsafe extern "C" fn hydra_engine_create(
    config_json: *const c_char,
    out_instance: *mut *mut HydraInstance,
) -> HydraErrorCode {
    if out_instance.is_null() {
        return track_error(&DefaultHydraError::null_pointer("out_instance"));
    }

    let mut created = ptr::null_mut();
    let code = track_result(|| {
        let json = unsafe { optional_str(config_json, "config_json") }?;
        created = Box::into_raw(HydraInstance::new(json)?);
        Ok(())
    });
    unsafe {
        *out_instance = created;
    }
    code
}

/// Destroys an instance previously created by `hydra_engine_create`.
///
/// Frees every cached map and drops the compute backend. Null is a no-op.
///
/// # Safety
/// - The pointer MUST have been created by `hydra_engine_create` and not freed already.
/// - The caller must not use the pointer again afterwards.
#[no_mangle]
pub unsafe extern "C" fn hydra_engine_destroy(ptr: *mut HydraInstance) {
    if ptr.is_null() {
        return;
    }

    // SAFETY: `ptr` came from `Box::into_raw` in `hydra_engine_create`.
    let instance = unsafe { Box::from_raw(ptr) };
    if let Ok(state) = instance.state.into_inner() {
        state.engine.teardown();
    }
}
