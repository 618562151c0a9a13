use hydra_core::{EngineContext, ErosionTarget, ImageTarget};

use crate::error::{DefaultHydraError, HydraErrorCode};
use crate::helpers::{instance_from_ptr, lock_state, track_result};
use crate::instance::HydraInstance;

/// Run one engine operation on a target.
///
/// Locks the engine for the whole solver run.
fn run_on_target<T>(
    ptr: *const HydraInstance,
    target: u32,
    op: impl FnOnce(&mut EngineContext, &mut dyn ErosionTarget) -> hydra_core::Result<T>,
) -> HydraErrorCode {
    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let mut state = lock_state(instance)?;
        state.with_target(target, |engine, target: &mut ImageTarget| {
            op(engine, target).map(|_| ()).map_err(DefaultHydraError::from)
        })?
    })
}

/// Generate the target's Base and Source maps if missing.
///
/// Every solver fails with `InvalidSource` until this has run once.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_prepare_base(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::prepare_base)
}

/// Particle (droplet) hydraulic erosion of a target's Source into its Result.
///
/// Thread-safe: the engine lock is held for the whole run.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_erode_particle(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::erode_particle)
}

/// Pipe-model (shallow water) hydraulic erosion.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_erode_pipe(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::erode_pipe)
}

/// Thermal (angle of repose) erosion.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_erode_thermal(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::erode_thermal)
}

/// Snow accumulation; writes `HYD_<target>_Snow` and/or a covered Result.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_simulate_snow(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::simulate_snow)
}

/// Flow map; writes `HYD_<target>_Flow`.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_generate_flow(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::generate_flow)
}

/// Color transport of the target's color image; writes `HYD_<target>_Color`.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_transport_color(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    run_on_target(ptr, target, EngineContext::transport_color)
}

/// Promote the target's Result to Source, and to Base as well when `also_base` is set.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_commit_result(
    ptr: *const HydraInstance,
    target: u32,
    also_base: bool,
) -> HydraErrorCode {
    run_on_target(ptr, target, |engine, target| {
        engine.commit_result_as_source(target, also_base)
    })
}
