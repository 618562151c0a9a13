//! Base/Source/Result lifecycle through the engine
//!
//! Covers heightmap generation, result naming, committing results, undo
//! through the graveyard, memory budgets and message batching.

use hydra_core::heightmap::MapSlots;
use hydra_core::{
    EngineConfig, EngineContext, ErosionError, ErosionTarget, ExternalImage, ImageTarget, Surface,
    SurfaceTarget,
};

fn engine_with(config: EngineConfig) -> EngineContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hydra_core=debug")
        .with_test_writer()
        .try_init();
    EngineContext::new(config)
}

fn ramp(name: &str, size: u32) -> ImageTarget {
    let values: Vec<f32> = (0..size * size)
        .map(|i| (i % size) as f32 / size as f32)
        .collect();
    ImageTarget::new(ExternalImage::from_gray(name, size, size, &values).expect("valid image"))
}

fn map_name(engine: &mut EngineContext, slot: Option<hydra_core::MapId>) -> String {
    let id = slot.expect("slot filled");
    engine.cache_mut().get(id).expect("map cached").name.clone()
}

#[test]
fn test_prepare_base_is_idempotent() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 16);

    assert!(engine.prepare_base(&mut target).expect("base"));
    let slots = *target.maps();
    assert!(slots.base.is_some() && slots.source.is_some());
    assert_ne!(slots.base, slots.source);
    assert_eq!(slots.result, None);

    assert!(!engine.prepare_base(&mut target).expect("base"));
    assert_eq!(*target.maps(), slots);
}

#[test]
fn test_repeated_runs_number_results() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 16);
    target.settings_mut().thermal.iterations = 2;

    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("first run");
    assert_eq!(map_name(&mut engine, target.maps().result), "Thermal 1");

    engine.commit_result_as_source(&mut target, false).expect("apply");
    assert_eq!(target.maps().result, None);
    assert_eq!(map_name(&mut engine, target.maps().source), "Thermal 1");

    engine.erode_thermal(&mut target).expect("second run");
    assert_eq!(map_name(&mut engine, target.maps().result), "Thermal 2");
}

#[test]
fn test_commit_without_result_is_noop() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 8);
    engine.prepare_base(&mut target).expect("base");
    let slots = *target.maps();

    engine
        .commit_result_as_source(&mut target, true)
        .expect("nothing to apply");
    assert_eq!(*target.maps(), slots);
    assert!(!engine.flush_messages().has_errors());
}

#[test]
fn test_commit_also_replaces_base() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 8);
    target.settings_mut().thermal.iterations = 3;
    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("thermal");
    let old_base = target.maps().base;

    engine.commit_result_as_source(&mut target, true).expect("apply");
    assert_ne!(target.maps().base, old_base);
    assert_eq!(map_name(&mut engine, target.maps().base), "Thermal 1");
}

#[test]
fn test_released_maps_resurrect_within_history() {
    let mut engine = engine_with(EngineConfig {
        history_length: 2,
        ..EngineConfig::cpu()
    });
    let mut target = ramp("ramp", 8);
    target.settings_mut().thermal.iterations = 1;

    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("run 1");
    let first = target.maps().result.expect("result");
    engine.erode_thermal(&mut target).expect("run 2");
    assert_ne!(target.maps().result, Some(first));
    assert!(!engine.cache().is_live(first));

    // The replaced result is still resurrectable
    assert!(engine.cache_mut().get(first).is_some());
    assert!(engine.cache().is_live(first));
}

#[test]
fn test_history_drops_oldest_release() {
    let mut engine = engine_with(EngineConfig {
        history_length: 1,
        ..EngineConfig::cpu()
    });
    let mut target = ramp("ramp", 8);
    target.settings_mut().thermal.iterations = 1;

    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("run 1");
    let first = target.maps().result.expect("result");
    engine.erode_thermal(&mut target).expect("run 2");
    engine.erode_thermal(&mut target).expect("run 3");

    assert!(!engine.cache().has(first));
    assert!(engine.cache().graveyard_len() <= 1);
}

#[test]
fn test_surface_target_rasterizes_relief() {
    let mut engine = engine_with(EngineConfig::cpu());
    let surface = Surface::from_grid(9, 9, |x, y| 1.0 - (x * x + y * y).sqrt().min(1.0));
    let mut target = SurfaceTarget::new("hill", surface);
    target.settings_mut().resolution = (32, 32);

    engine.prepare_base(&mut target).expect("base");
    let base = target.maps().base.expect("base");
    let (min, max) = engine.cache_mut().get(base).expect("cached").field.min_max();
    assert!(min >= 0.0);
    assert!(max > min);
}

#[test]
fn test_empty_surface_is_invalid() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = SurfaceTarget::new("nothing", Surface::default());

    let err = engine.prepare_base(&mut target).expect_err("no geometry");
    assert!(matches!(err, ErosionError::InvalidSource(_)));
    assert_eq!(*target.maps(), MapSlots::default());

    let err = engine.erode_thermal(&mut target).expect_err("never prepared");
    assert!(matches!(err, ErosionError::InvalidSource(_)));
    assert_eq!(engine.cache().live_count(), 0);
}

#[test]
fn test_budget_exhaustion_is_reported() {
    // Enough for the input image maps, not for a solver's working set
    let mut engine = engine_with(EngineConfig {
        memory_budget_bytes: Some(3 * 32 * 32 * 4),
        ..EngineConfig::cpu()
    });
    let mut target = ramp("ramp", 32);
    target.settings_mut().pipe.iterations = 1;

    engine.prepare_base(&mut target).expect("base");
    let err = engine.erode_pipe(&mut target).expect_err("over budget");
    assert!(matches!(err, ErosionError::ResourceExhausted { .. }));
    let report = engine.flush_messages();
    assert!(report.error_text().contains("Pipe-model erosion failed"));
}

#[test]
fn test_messages_are_batched_until_flush() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 8);
    target.settings_mut().thermal.iterations = 1;
    target.settings_mut().flow.iterations = 1;

    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("thermal");
    engine.generate_flow(&mut target).expect("flow");

    let report = engine.flush_messages();
    assert!(!report.has_errors());
    let info = report.info_text();
    assert!(info.contains("Thermal erosion"));
    assert!(info.contains("Flow map"));

    assert!(engine.flush_messages().is_empty());
}

#[test]
fn test_displacement_and_export_land_in_library() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 16);
    target.settings_mut().thermal.iterations = 5;
    engine.prepare_base(&mut target).expect("base");
    let result = engine.erode_thermal(&mut target).expect("thermal");

    engine
        .read_to_image(result, "exported")
        .expect("export");
    let displacement = engine
        .displacement(&target, "HYD_ramp_Displacement")
        .expect("displacement");

    assert!(engine.images().contains("exported"));
    assert!(engine.images().contains("HYD_ramp_Displacement"));
    assert_eq!(displacement.width, 16);
    assert!(displacement.pixels.iter().all(|v| v.is_finite()));
}

#[test]
fn test_teardown_after_release() {
    let mut engine = engine_with(EngineConfig::cpu());
    let mut target = ramp("ramp", 8);
    engine.prepare_base(&mut target).expect("base");
    engine.release_target(&mut target);
    assert_eq!(engine.cache().live_count(), 0);
    engine.teardown();
}
