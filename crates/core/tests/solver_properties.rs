//! Physical properties every solver must keep
//!
//! Thermal relaxation and snow conserve material, flow maps stay
//! displayable, pipe-model outputs stay finite and non-negative and color
//! transport only mixes existing colors.

use approx::assert_relative_eq;
use hydra_core::planet::{face_uv_to_cube, CubeFace};
use hydra_core::settings::{ColorSolver, SnowOutput};
use hydra_core::{
    ColorSpace, EngineConfig, EngineContext, ErosionTarget, ExternalImage, ImageTarget, Tiling,
};

fn engine() -> EngineContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hydra_core=info")
        .with_test_writer()
        .try_init();
    EngineContext::new(EngineConfig {
        seed: 5,
        ..EngineConfig::cpu()
    })
}

/// Two bumps and a ridge on a `width`x`height` grid, heights in `[0, 0.5]`
fn terrain(name: &str, width: u32, height: u32) -> ImageTarget {
    let values: Vec<f32> = (0..width * height)
        .map(|i| {
            let x = (i % width) as f32 / width as f32;
            let y = (i / width) as f32 / height as f32;
            let bump = |cx: f32, cy: f32| (-((x - cx).powi(2) + (y - cy).powi(2)) * 40.0).exp();
            let ridge = (1.0 - (y - 0.5).abs() * 4.0).max(0.0) * 0.2;
            (0.3 * bump(0.3, 0.3) + 0.25 * bump(0.7, 0.6) + ridge).min(0.5)
        })
        .collect();
    ImageTarget::new(ExternalImage::from_gray(name, width, height, &values).expect("valid image"))
}

fn map_values(engine: &mut EngineContext, id: Option<hydra_core::MapId>) -> Vec<f32> {
    let id = id.expect("map stored");
    engine
        .cache_mut()
        .get(id)
        .expect("map cached")
        .field
        .as_slice()
        .to_vec()
}

fn total(values: &[f32]) -> f64 {
    values.iter().map(|&v| f64::from(v)).sum()
}

fn red(image: &ExternalImage) -> Vec<f32> {
    image.pixels.chunks_exact(4).map(|px| px[0]).collect()
}

#[test]
fn test_thermal_conserves_material() {
    for tiling in [Tiling::None, Tiling::Xy] {
        let mut engine = engine();
        let mut target = terrain("hills", 48, 32);
        {
            let settings = target.settings_mut();
            settings.tiling = tiling;
            settings.thermal.iterations = 40;
            settings.thermal.max_angle = 0.05;
        }
        engine.prepare_base(&mut target).expect("base");
        engine.erode_thermal(&mut target).expect("thermal erosion");

        let source = map_values(&mut engine, target.maps().source);
        let result = map_values(&mut engine, target.maps().result);
        assert_relative_eq!(total(&result), total(&source), max_relative = 1e-4);

        let before = source.iter().copied().fold(f32::MIN, f32::max);
        let after = result.iter().copied().fold(f32::MIN, f32::max);
        assert!(after < before, "steep peaks must slump");
    }
}

#[test]
fn test_thermal_with_stride_gradient_conserves_material() {
    let mut engine = engine();
    let mut target = terrain("hills", 40, 40);
    {
        let thermal = &mut target.settings_mut().thermal;
        thermal.iterations = 30;
        thermal.use_stride = true;
        thermal.stride = 4;
        thermal.stride_gradient = true;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("thermal erosion");

    let source = map_values(&mut engine, target.maps().source);
    let result = map_values(&mut engine, target.maps().result);
    assert_relative_eq!(total(&result), total(&source), max_relative = 1e-4);
}

#[test]
fn test_planet_thermal_stays_finite() {
    let mut engine = engine();
    let mut target = terrain("planet", 64, 32);
    {
        let settings = target.settings_mut();
        settings.tiling = Tiling::Planet;
        settings.thermal.iterations = 10;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_thermal(&mut target).expect("planet thermal erosion");

    let result = map_values(&mut engine, target.maps().result);
    assert_eq!(result.len(), 64 * 32);
    assert!(result.iter().all(|v| v.is_finite()));
}

#[test]
fn test_cube_face_centers_span_the_axes() {
    let mut sum = [0.0f32; 3];
    for face in CubeFace::all() {
        let center = face_uv_to_cube(face, 0.5, 0.5);
        assert_relative_eq!(center.norm(), 1.0, epsilon = 1e-6);
        // Corners sit on the same face plane, one unit from the center on each tangent axis
        let corner = face_uv_to_cube(face, 0.0, 0.0);
        assert_relative_eq!(corner.dot(&center), 1.0, epsilon = 1e-6);
        assert_relative_eq!((corner - center).norm(), 2.0f32.sqrt(), epsilon = 1e-5);
        for (acc, c) in sum.iter_mut().zip(center.iter()) {
            *acc += c;
        }
    }
    assert!(sum.iter().all(|c| c.abs() < 1e-6));
}

#[test]
fn test_snow_layer_is_conserved() {
    let mut engine = engine();
    let mut target = terrain("alps", 32, 32);
    {
        let snow = &mut target.settings_mut().snow;
        snow.iterations = 60;
        snow.output = SnowOutput::Both;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.simulate_snow(&mut target).expect("snow");

    let snow = engine.images().get("HYD_alps_Snow").expect("snow image");
    let depth = red(snow);
    // Normalized so an untouched layer reads 1 everywhere
    let mean = total(&depth) / depth.len() as f64;
    assert_relative_eq!(mean, 1.0, max_relative = 1e-3);
    assert!(depth.iter().all(|&v| v >= -1e-6));

    let source = map_values(&mut engine, target.maps().source);
    let covered = map_values(&mut engine, target.maps().result);
    assert!(covered.iter().zip(&source).all(|(c, s)| c >= &(s - 1e-6)));
}

#[test]
fn test_snow_texture_output_keeps_result_slot() {
    let mut engine = engine();
    let mut target = terrain("alps", 16, 16);
    {
        let snow = &mut target.settings_mut().snow;
        snow.iterations = 4;
        snow.output = SnowOutput::Texture;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.simulate_snow(&mut target).expect("snow");
    assert!(engine.images().contains("HYD_alps_Snow"));
    assert_eq!(target.maps().result, None);
}

#[test]
fn test_flow_map_is_displayable() {
    for tiling in [Tiling::None, Tiling::Planet] {
        let mut engine = engine();
        let mut target = terrain("basin", 64, 32);
        {
            let settings = target.settings_mut();
            settings.tiling = tiling;
            settings.flow.iterations = 4;
            settings.flow.brightness = 80.0;
        }
        engine.prepare_base(&mut target).expect("base");
        let name = engine.generate_flow(&mut target).expect("flow map");
        assert_eq!(name, "HYD_basin_Flow");

        let flow = red(engine.images().get(&name).expect("flow image"));
        assert!(flow.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(flow.iter().any(|&v| v > 0.0));
        // Flow never changes the heightmap
        assert_eq!(target.maps().result, None);
    }
}

#[test]
fn test_pipe_outputs_are_finite_and_non_negative() {
    let mut engine = engine();
    let mut target = terrain("valley", 32, 32);
    {
        let pipe = &mut target.settings_mut().pipe;
        pipe.iterations = 80;
        pipe.output_water = true;
        pipe.output_sediment = true;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_pipe(&mut target).expect("pipe erosion");

    let result = map_values(&mut engine, target.maps().result);
    assert!(result.iter().all(|v| v.is_finite()));
    let source = map_values(&mut engine, target.maps().source);
    assert!(result.iter().zip(&source).any(|(r, s)| (r - s).abs() > 1e-7));

    for suffix in ["Water", "Sediment"] {
        let image = engine
            .images()
            .get(&format!("HYD_valley_{suffix}"))
            .expect("side output");
        assert!(red(image).iter().all(|&v| v.is_finite() && v >= 0.0));
    }
}

#[test]
fn test_pipe_without_rain_or_erosion_keeps_terrain() {
    let mut engine = engine();
    let mut target = terrain("dry", 24, 24);
    {
        let pipe = &mut target.settings_mut().pipe;
        pipe.iterations = 20;
        pipe.rain = 0.0;
        pipe.erosion = 0.0;
        pipe.deposition = 0.0;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_pipe(&mut target).expect("pipe erosion");

    let source = map_values(&mut engine, target.maps().source);
    let result = map_values(&mut engine, target.maps().result);
    for (r, s) in result.iter().zip(&source) {
        assert_relative_eq!(*r, *s, epsilon = 1e-5);
    }
}

#[test]
fn test_pipe_keeps_flat_field_flat() {
    let mut engine = engine();
    let flat = ExternalImage::from_gray("lake", 20, 20, &[0.4; 400]).expect("valid image");
    let mut target = ImageTarget::new(flat);
    {
        let pipe = &mut target.settings_mut().pipe;
        pipe.iterations = 30;
        pipe.random_rain = false;
        pipe.output_water = true;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_pipe(&mut target).expect("pipe erosion");

    let result = map_values(&mut engine, target.maps().result);
    for r in &result {
        assert_relative_eq!(*r, 0.4, epsilon = 1e-5);
    }
    let water = red(engine.images().get("HYD_lake_Water").expect("water output"));
    let (lo, hi) = water
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &w| (lo.min(w), hi.max(w)));
    assert!(lo >= 0.0);
    assert_relative_eq!(lo, hi, epsilon = 1e-5);
}

#[test]
fn test_missing_hardness_is_recovered() {
    let mut engine = engine();
    let mut target = terrain("soft", 16, 16);
    {
        let settings = target.settings_mut();
        settings.hardness_image = Some("deleted".into());
        settings.pipe.iterations = 4;
    }
    engine.prepare_base(&mut target).expect("base");
    engine.erode_pipe(&mut target).expect("missing hardness is not fatal");

    let report = engine.flush_messages();
    assert!(!report.has_errors());
    assert!(report.info_text().contains("Hardness map missing"));
}

fn paint(width: u32, height: u32) -> ExternalImage {
    let pixels = (0..width * height)
        .flat_map(|i| {
            if (i % width) < width / 2 {
                [1.0, 0.0, 0.0, 1.0]
            } else {
                [0.0, 0.0, 1.0, 1.0]
            }
        })
        .collect();
    ExternalImage::new("paint", width, height, pixels, ColorSpace::Linear).expect("valid image")
}

#[test]
fn test_color_transport_mixes_existing_colors() {
    for solver in [ColorSolver::Particle, ColorSolver::Pipe] {
        let mut engine = engine();
        engine.images_mut().insert(paint(32, 32));
        let mut target = terrain("painted", 32, 32);
        {
            let settings = target.settings_mut();
            settings.color.color_image = Some("paint".into());
            settings.color.solver = solver;
            settings.color.iterations = 4;
            settings.pipe.iterations = 20;
        }
        engine.prepare_base(&mut target).expect("base");
        let name = engine.transport_color(&mut target).expect("color transport");
        assert_eq!(name, "HYD_painted_Color");

        let color = engine.images().get(&name).expect("color image");
        assert_eq!(color.pixels.len(), 32 * 32 * 4);
        for px in color.pixels.chunks_exact(4) {
            assert!(px.iter().all(|v| v.is_finite()));
            // Red and blue only ever trade places, green never appears
            assert!(px[1].abs() < 1e-4, "{solver:?} produced green {}", px[1]);
            assert!(px[0] > -1e-4 && px[0] < 1.0 + 1e-4);
        }
    }
}
