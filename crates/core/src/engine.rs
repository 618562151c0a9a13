//! Engine context
//!
//! [`EngineContext`] owns every long-lived resource of the engine: the
//! compute backend, the texture manager, the map cache, the host image
//! library and the pending messages. There is no global state; hosts create
//! one context and pass it by `&mut` to every operation.
//!
//! Every public operation either completes or returns an error. On error
//! the message is also queued for the next [`EngineContext::flush_messages`].

use tracing::info;

use crate::config::EngineConfig;
use crate::erosion::{color, flow, particle, pipe, snow, thermal, SolverContext};
use crate::error::{ErosionError, Result};
use crate::field::{Field, TextureManager};
use crate::heightmap::{self, ErosionTarget, MapCache, MapId};
use crate::image::{ExternalImage, ImageLibrary, ImageSink};
use crate::messages::{MessageLog, Report};
use crate::solver::{create_backend, ComputeBackend};

/// Owner of all engine state
pub struct EngineContext {
    config: EngineConfig,
    backend: Box<dyn ComputeBackend>,
    manager: TextureManager,
    cache: MapCache,
    images: ImageLibrary,
    messages: MessageLog,
    /// Solver calls so far, mixed into each call's seed
    calls: u32,
}

impl EngineContext {
    /// Create a context, selecting the backend from the configuration
    pub fn new(config: EngineConfig) -> Self {
        let backend = create_backend(config.backend);
        Self::with_backend(config, backend)
    }

    /// Create a context around an explicit backend
    pub fn with_backend(config: EngineConfig, backend: Box<dyn ComputeBackend>) -> Self {
        info!(
            backend = backend.name(),
            history = config.history_length,
            budget = ?config.memory_budget_bytes,
            "Creating engine context"
        );
        Self {
            manager: TextureManager::new(config.memory_budget_bytes),
            cache: MapCache::new(config.history_length),
            images: ImageLibrary::new(),
            messages: MessageLog::new(),
            backend,
            config,
            calls: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the active compute backend
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_gpu_accelerated(&self) -> bool {
        self.backend.is_gpu_accelerated()
    }

    pub fn manager(&self) -> &TextureManager {
        &self.manager
    }

    pub fn cache(&self) -> &MapCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut MapCache {
        &mut self.cache
    }

    pub fn images(&self) -> &ImageLibrary {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageLibrary {
        &mut self.images
    }

    /// Messages queued since the last flush, as one report
    pub fn flush_messages(&mut self) -> Report {
        self.messages.flush()
    }

    fn record<T>(&mut self, what: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.messages.error(format!("{what} failed: {e}"));
        }
        result
    }

    fn solve<T>(
        &mut self,
        what: &str,
        run: impl FnOnce(&mut SolverContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let seed = self.config.seed.wrapping_add(self.calls);
        self.calls = self.calls.wrapping_add(1);
        let result = {
            let mut ctx = SolverContext {
                backend: &mut *self.backend,
                manager: &self.manager,
                cache: &mut self.cache,
                images: &mut self.images,
                messages: &mut self.messages,
                seed,
            };
            run(&mut ctx)
        };
        self.record(what, result)
    }

    /// Generate Base (and Source) for the target if missing
    ///
    /// Returns `true` when Base was (re)generated.
    pub fn prepare_base(&mut self, target: &mut dyn ErosionTarget) -> Result<bool> {
        let result = heightmap::prepare_base(&mut self.cache, &self.manager, target);
        self.record("Heightmap generation", result)
    }

    /// Regenerate Base from the target's current geometry
    pub fn recalculate_base(&mut self, target: &mut dyn ErosionTarget) -> Result<()> {
        let result = heightmap::recalculate_base(&mut self.cache, &self.manager, target);
        self.record("Heightmap recalculation", result)
    }

    /// Particle hydraulic erosion, stored as the target's Result
    pub fn erode_particle(&mut self, target: &mut dyn ErosionTarget) -> Result<MapId> {
        self.solve("Particle erosion", |ctx| particle::erode(ctx, target))
    }

    /// Pipe-model hydraulic erosion, stored as the target's Result
    pub fn erode_pipe(&mut self, target: &mut dyn ErosionTarget) -> Result<MapId> {
        self.solve("Pipe-model erosion", |ctx| pipe::erode(ctx, target))
    }

    /// Thermal erosion, stored as the target's Result
    pub fn erode_thermal(&mut self, target: &mut dyn ErosionTarget) -> Result<MapId> {
        self.solve("Thermal erosion", |ctx| thermal::erode(ctx, target))
    }

    /// Snow accumulation; see [`snow::simulate`] for the outputs
    pub fn simulate_snow(&mut self, target: &mut dyn ErosionTarget) -> Result<()> {
        self.solve("Snow simulation", |ctx| snow::simulate(ctx, target))
    }

    /// Flow map, returns the name of the written image
    pub fn generate_flow(&mut self, target: &mut dyn ErosionTarget) -> Result<String> {
        self.solve("Flow map", |ctx| flow::generate(ctx, target))
    }

    /// Color transport, returns the name of the written image
    pub fn transport_color(&mut self, target: &mut dyn ErosionTarget) -> Result<String> {
        self.solve("Color transport", |ctx| color::simulate(ctx, target))
    }

    /// Promote the target's Result to Source
    pub fn commit_result_as_source(
        &mut self,
        target: &mut dyn ErosionTarget,
        also_base: bool,
    ) -> Result<()> {
        let result =
            heightmap::commit_result_as_source(&mut self.cache, &self.manager, target, also_base);
        self.record("Apply", result)
    }

    /// `scale * (a - factor * b)` of two cached maps
    pub fn scaled_difference(&mut self, a: MapId, b: MapId, factor: f32, scale: f32) -> Result<Field> {
        let result = heightmap::scaled_difference(&mut self.cache, &self.manager, a, b, factor, scale);
        self.record("Difference", result)
    }

    /// Export a cached map into the image library under `name`
    pub fn read_to_image(&mut self, id: MapId, name: &str) -> Result<ExternalImage> {
        let result = match self.cache.get(id) {
            Some(map) => self.manager.read_to_image(&map.field, name),
            None => Err(ErosionError::invalid_source(format!("map {id} is not cached"))),
        };
        let image = self.record("Export", result)?;
        self.images.store(image.clone());
        Ok(image)
    }

    /// Displacement of the target's latest map against Base, written to the library
    pub fn displacement(&mut self, target: &dyn ErosionTarget, name: &str) -> Result<ExternalImage> {
        let result = heightmap::displacement(&mut self.cache, &self.manager, target)
            .and_then(|field| self.manager.read_to_image(&field, name));
        let image = self.record("Displacement", result)?;
        self.images.store(image.clone());
        Ok(image)
    }

    /// Release every map held by the target
    pub fn release_target(&mut self, target: &mut dyn ErosionTarget) {
        let maps = std::mem::take(target.maps_mut());
        for id in [maps.result, maps.source, maps.base].into_iter().flatten() {
            self.cache.try_release(id);
        }
    }

    /// Free every map and drop the backend
    pub fn teardown(mut self) {
        self.cache.free_all();
        info!(
            live_fields = self.manager.live_fields(),
            "Engine context torn down"
        );
    }
}
