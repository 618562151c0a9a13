use std::ffi::c_char;

use hydra_core::heightmap::result_or_source;
use hydra_core::{ColorSpace, ErosionSettings, ErosionTarget, ExternalImage, ImageTarget};

use crate::error::{DefaultHydraError, HydraErrorCode};
use crate::helpers::{
    instance_from_ptr, lock_state, required_str, rgba_len, track_error, track_result,
};
use crate::instance::HydraInstance;

/// Copy an RGBA float buffer into an image.
///
/// # Safety
/// `pixels` must be null or point to `width * height * 4` readable floats.
unsafe fn image_from_raw(
    name: &str,
    width: u32,
    height: u32,
    pixels: *const f32,
    srgb: bool,
) -> Result<ExternalImage, DefaultHydraError> {
    if pixels.is_null() {
        return Err(DefaultHydraError::null_pointer("pixels"));
    }
    let len = rgba_len(width, height)?;
    // SAFETY: non-null and `len` floats long per the function contract.
    let data = unsafe { std::slice::from_raw_parts(pixels, len) }.to_vec();
    let colorspace = if srgb {
        ColorSpace::Srgb
    } else {
        ColorSpace::Linear
    };
    Ok(ExternalImage::new(name, width, height, data, colorspace)?)
}

/// Create an image-backed erosion target; heights are read from the red channel.
///
/// Parameters
/// - `name`: target name, used for `HYD_<name>_*` output images.
/// - `pixels`: `width * height` linear RGBA floats, copied before returning.
/// - `out_target`: receives the target handle (never 0).
///
/// # Safety
/// - `ptr` must come from `hydra_engine_create`.
/// - `name` must be a null-terminated string.
/// - `pixels` must point to `width * height * 4` floats.
/// - `out_target` must be a valid pointer to writable memory.
#[no_mangle]
pub unsafe extern "C" fn hydra_target_from_pixels(
    ptr: *const HydraInstance,
    name: *const c_char,
    width: u32,
    height: u32,
    pixels: *const f32,
    out_target: *mut u32,
) -> HydraErrorCode {
    if out_target.is_null() {
        return track_error(&DefaultHydraError::null_pointer("out_target"));
    }

    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let name = unsafe { required_str(name, "name") }?;
        let image = unsafe { image_from_raw(name, width, height, pixels, false) }?;
        let handle = lock_state(instance)?.add_target(ImageTarget::new(image));
        unsafe {
            *out_target = handle;
        }
        Ok(())
    })
}

/// Replace a target's settings from JSON; missing fields take their defaults.
///
/// The resolution always follows the target's image.
///
/// # Safety
/// - `ptr` must come from `hydra_engine_create`.
/// - `json` must be a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn hydra_target_set_settings_json(
    ptr: *const HydraInstance,
    target: u32,
    json: *const c_char,
) -> HydraErrorCode {
    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let json = unsafe { required_str(json, "json") }?;
        let settings = ErosionSettings::from_json(json)?;
        let mut state = lock_state(instance)?;
        let slot = state
            .targets
            .get_mut(&target)
            .ok_or_else(|| DefaultHydraError::unknown_target(target))?;
        let resolution = slot.settings().resolution;
        *slot.settings_mut() = ErosionSettings {
            resolution,
            ..settings
        };
        Ok(())
    })
}

/// Release a target and every map it holds.
///
/// # Safety
/// `ptr` must come from `hydra_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn hydra_target_release(ptr: *const HydraInstance, target: u32) -> HydraErrorCode {
    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let mut state = lock_state(instance)?;
        let mut removed = state
            .targets
            .remove(&target)
            .ok_or_else(|| DefaultHydraError::unknown_target(target))?;
        state.engine.release_target(&mut removed);
        Ok(())
    })
}

/// Copy the target's latest heights (Result, else Source) into `out_heights`.
///
/// `len` must equal `width * height` of the target.
///
/// # Safety
/// - `ptr` must come from `hydra_engine_create`.
/// - `out_heights` must point to `len` writable floats.
#[no_mangle]
pub unsafe extern "C" fn hydra_target_read_result(
    ptr: *const HydraInstance,
    target: u32,
    out_heights: *mut f32,
    len: usize,
) -> HydraErrorCode {
    if out_heights.is_null() {
        return track_error(&DefaultHydraError::null_pointer("out_heights"));
    }

    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let mut state = lock_state(instance)?;
        state.with_target(target, |engine, target| -> Result<(), DefaultHydraError> {
            engine.prepare_base(target)?;
            let map = result_or_source(engine.cache_mut(), target)?;
            let values = map.field.as_slice();
            if values.len() != len {
                return Err(DefaultHydraError::invalid_parameter(
                    "len",
                    &format!("expected {}, got {len}", values.len()),
                ));
            }
            // SAFETY: non-null and `len` floats long per the function contract.
            let out = unsafe { std::slice::from_raw_parts_mut(out_heights, len) };
            out.copy_from_slice(values);
            Ok(())
        })?
    })
}

/// Add or replace an auxiliary image (hardness, water source, color).
///
/// # Safety
/// - `ptr` must come from `hydra_engine_create`.
/// - `name` must be a null-terminated string.
/// - `pixels` must point to `width * height * 4` floats.
#[no_mangle]
pub unsafe extern "C" fn hydra_image_store(
    ptr: *const HydraInstance,
    name: *const c_char,
    width: u32,
    height: u32,
    pixels: *const f32,
    srgb: bool,
) -> HydraErrorCode {
    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let name = unsafe { required_str(name, "name") }?;
        let image = unsafe { image_from_raw(name, width, height, pixels, srgb) }?;
        lock_state(instance)?.engine.images_mut().insert(image);
        Ok(())
    })
}

/// Copy a library image (e.g. `HYD_<target>_Flow`) into `out_pixels` as linear RGBA.
///
/// Pass a null `out_pixels` to query the size through `out_width`/`out_height` only.
///
/// # Safety
/// - `ptr` must come from `hydra_engine_create`.
/// - `name` must be a null-terminated string.
/// - `out_width` and `out_height` must be valid writable pointers.
/// - A non-null `out_pixels` must point to `len` writable floats.
#[no_mangle]
pub unsafe extern "C" fn hydra_image_read(
    ptr: *const HydraInstance,
    name: *const c_char,
    out_width: *mut u32,
    out_height: *mut u32,
    out_pixels: *mut f32,
    len: usize,
) -> HydraErrorCode {
    if out_width.is_null() || out_height.is_null() {
        return track_error(&DefaultHydraError::null_pointer("out_width/out_height"));
    }

    track_result(|| {
        let instance = instance_from_ptr(ptr)?;
        let name = unsafe { required_str(name, "name") }?;
        let state = lock_state(instance)?;
        let image = state.engine.images().get(name).ok_or_else(|| {
            DefaultHydraError::from(hydra_core::ErosionError::ExternalAssetMissing(format!(
                "image '{name}' not found"
            )))
        })?;
        unsafe {
            *out_width = image.width;
            *out_height = image.height;
        }
        if out_pixels.is_null() {
            return Ok(());
        }
        if image.pixels.len() != len {
            return Err(DefaultHydraError::invalid_parameter(
                "len",
                &format!("expected {}, got {len}", image.pixels.len()),
            ));
        }
        // SAFETY: non-null and `len` floats long per the function contract.
        let out = unsafe { std::slice::from_raw_parts_mut(out_pixels, len) };
        out.copy_from_slice(&image.pixels);
        Ok(())
    })
}
