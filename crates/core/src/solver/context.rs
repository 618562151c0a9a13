//! GPU context and initialization
//!
//! Distinguishes "no GPU found" (expected on headless machines) from "GPU
//! found but failed to initialize" (likely a driver problem worth a warning).

/// Outcome of bringing up a compute device
#[derive(Debug)]
pub enum GpuInitResult {
    #[cfg(feature = "gpu")]
    Success(GpuContext),
    /// No adapter at all; callers fall back to the CPU without complaint
    NoGpuFound,
    /// An adapter exists but refused to give us a device
    InitFailed { adapter_name: String, error: String },
}

#[cfg(feature = "gpu")]
mod gpu_impl {
    use super::GpuInitResult;
    use tracing::{debug, info};

    /// Compute device and queue of one adapter
    #[derive(Debug)]
    pub struct GpuContext {
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    }

    fn find_adapter() -> Option<wgpu::Adapter> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
    }

    /// Default limits, widened to whatever storage the adapter really offers.
    ///
    /// Heightmaps of 4k and above exceed the 128 MiB default binding size.
    fn storage_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
        let offered = adapter.limits();
        wgpu::Limits {
            max_storage_buffer_binding_size: offered.max_storage_buffer_binding_size,
            max_buffer_size: offered.max_buffer_size,
            ..wgpu::Limits::default().using_resolution(offered)
        }
    }

    impl GpuContext {
        /// Bring up a compute-only device on the best adapter
        #[allow(clippy::new_ret_no_self)]
        pub fn new() -> GpuInitResult {
            let Some(adapter) = find_adapter() else {
                debug!("No GPU adapter found");
                return GpuInitResult::NoGpuFound;
            };
            let adapter_info = adapter.get_info();
            debug!(adapter = %adapter_info.name, backend = ?adapter_info.backend, "Requesting erosion device");

            let descriptor = wgpu::DeviceDescriptor {
                label: Some("Hydra GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: storage_limits(&adapter),
                memory_hints: wgpu::MemoryHints::Performance,
            };
            match pollster::block_on(adapter.request_device(&descriptor, None)) {
                Ok((device, queue)) => {
                    info!("GPU erosion device ready: {}", adapter_info.name);
                    GpuInitResult::Success(Self {
                        device,
                        queue,
                        adapter_info,
                    })
                }
                Err(e) => GpuInitResult::InitFailed {
                    adapter_name: adapter_info.name,
                    error: e.to_string(),
                },
            }
        }

        pub fn adapter_name(&self) -> &str {
            &self.adapter_info.name
        }

        /// Whether a buffer of `bytes` can be bound as one storage binding
        pub fn can_allocate(&self, bytes: u64) -> bool {
            let limits = self.device.limits();
            bytes <= u64::from(limits.max_storage_buffer_binding_size) && bytes <= limits.max_buffer_size
        }

        pub fn device(&self) -> &wgpu::Device {
            &self.device
        }

        pub fn queue(&self) -> &wgpu::Queue {
            &self.queue
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_init_reports_a_usable_outcome() {
            match GpuContext::new() {
                GpuInitResult::Success(ctx) => assert!(!ctx.adapter_name().is_empty()),
                GpuInitResult::NoGpuFound => {}
                GpuInitResult::InitFailed { error, .. } => assert!(!error.is_empty()),
            }
        }

        #[test]
        fn test_huge_buffers_are_rejected() {
            if let GpuInitResult::Success(ctx) = GpuContext::new() {
                assert!(ctx.can_allocate(256 * 256 * 4));
                assert!(!ctx.can_allocate(u64::MAX / 2));
            }
        }
    }
}

#[cfg(feature = "gpu")]
pub use gpu_impl::GpuContext;
