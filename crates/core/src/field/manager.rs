//! Field allocation and accounting
//!
//! The [`TextureManager`] is the only way to obtain a [`Field`]. Each field
//! carries a lease on the manager's byte budget which is returned when the
//! field is dropped, so releasing is both explicit ([`TextureManager::release`])
//! and impossible to forget on error paths.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, trace};

use super::data::Field;
use super::ops;
use crate::error::{ErosionError, Result};

#[derive(Debug, Default)]
struct AllocationTracker {
    budget: Option<u64>,
    in_use: AtomicU64,
    live: AtomicUsize,
}

impl AllocationTracker {
    fn reserve(&self, bytes: u64) -> Result<()> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if let Some(budget) = self.budget {
                if next > budget {
                    return Err(ErosionError::ResourceExhausted {
                        requested: bytes,
                        in_use: current,
                        budget,
                    });
                }
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn free(&self, bytes: u64) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Budget lease held by a live field
#[derive(Debug)]
pub(crate) struct Lease {
    tracker: Option<Arc<AllocationTracker>>,
    bytes: u64,
}

impl Lease {
    pub(crate) fn is_active(&self) -> bool {
        self.tracker.is_some()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.free(self.bytes);
        }
    }
}

/// Allocates, copies, resamples and releases fields
///
/// Cloning a manager yields a handle to the same budget.
#[derive(Debug, Clone, Default)]
pub struct TextureManager {
    tracker: Arc<AllocationTracker>,
}

impl TextureManager {
    /// Create a manager with an optional byte budget
    ///
    /// # Arguments
    ///
    /// * `budget_bytes` - Maximum bytes held by live fields, `None` for unbounded
    pub fn new(budget_bytes: Option<u64>) -> Self {
        Self {
            tracker: Arc::new(AllocationTracker {
                budget: budget_bytes,
                ..AllocationTracker::default()
            }),
        }
    }

    /// Create a manager without a budget
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Configured budget in bytes
    pub fn budget(&self) -> Option<u64> {
        self.tracker.budget
    }

    /// Bytes currently held by live fields
    pub fn bytes_in_use(&self) -> u64 {
        self.tracker.in_use.load(Ordering::Acquire)
    }

    /// Number of live fields allocated through this manager
    pub fn live_fields(&self) -> usize {
        self.tracker.live.load(Ordering::Acquire)
    }

    /// Whether an allocation of `bytes` would currently fit the budget
    pub fn can_allocate(&self, bytes: u64) -> bool {
        self.budget()
            .map_or(true, |budget| self.bytes_in_use().saturating_add(bytes) <= budget)
    }

    fn validate(width: u32, height: u32, channels: u8) -> Result<usize> {
        if !(1..=4).contains(&channels) {
            return Err(ErosionError::UnsupportedChannelCount(channels));
        }
        if width == 0 || height == 0 {
            return Err(ErosionError::invalid_source(format!(
                "cannot allocate a {width}x{height} field"
            )));
        }
        Ok(width as usize * height as usize * channels as usize)
    }

    fn lease(&self, len: usize) -> Result<Lease> {
        let bytes = len as u64 * 4;
        self.tracker.reserve(bytes)?;
        Ok(Lease {
            tracker: Some(Arc::clone(&self.tracker)),
            bytes,
        })
    }

    /// Allocate a zero-initialized field
    ///
    /// # Errors
    ///
    /// `UnsupportedChannelCount` outside 1-4 channels, `InvalidSource` for an
    /// empty size, `ResourceExhausted` when the budget would be exceeded.
    pub fn create(&self, width: u32, height: u32, channels: u8) -> Result<Field> {
        self.create_filled(width, height, channels, 0.0)
    }

    /// Allocate a field with every value set to `value`
    pub fn create_filled(&self, width: u32, height: u32, channels: u8, value: f32) -> Result<Field> {
        let len = Self::validate(width, height, channels)?;
        let lease = self.lease(len)?;
        trace!(width, height, channels, "Allocated field");
        Ok(Field {
            data: vec![value; len],
            width,
            height,
            channels,
            lease,
        })
    }

    /// Allocate a field that takes ownership of `data`
    pub fn create_from(
        &self,
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<f32>,
    ) -> Result<Field> {
        let len = Self::validate(width, height, channels)?;
        if data.len() != len {
            return Err(ErosionError::invalid_source(format!(
                "expected {len} values for a {width}x{height}x{channels} field, got {}",
                data.len()
            )));
        }
        let lease = self.lease(len)?;
        Ok(Field {
            data,
            width,
            height,
            channels,
            lease,
        })
    }

    /// Deep copy of `field`
    pub fn clone_field(&self, field: &Field) -> Result<Field> {
        self.create_from(
            field.width,
            field.height,
            field.channels,
            field.data.clone(),
        )
    }

    /// Bilinear resample of `field` into a new field of the given size
    ///
    /// Texel centers are aligned, so resizing to the same size is an exact copy.
    pub fn resize(&self, field: &Field, width: u32, height: u32) -> Result<Field> {
        let mut out = self.create(width, height, field.channels)?;
        if field.size() == (width, height) {
            out.copy_from(field);
        } else {
            debug!(
                from_w = field.width,
                from_h = field.height,
                to_w = width,
                to_h = height,
                "Resizing field"
            );
            ops::resample_bilinear(field, &mut out);
        }
        Ok(out)
    }

    /// `scale * (a - factor * b)` into a new field
    ///
    /// `factor = -1` adds `b` instead of subtracting it.
    pub fn scaled_difference(&self, a: &Field, b: &Field, factor: f32, scale: f32) -> Result<Field> {
        if !a.same_shape(b) {
            return Err(ErosionError::invalid_source(format!(
                "cannot combine {}x{}x{} with {}x{}x{}",
                a.width, a.height, a.channels, b.width, b.height, b.channels
            )));
        }
        let mut out = self.create(a.width, a.height, a.channels)?;
        out.data
            .par_iter_mut()
            .zip(a.data.par_iter().zip(b.data.par_iter()))
            .for_each(|(o, (&va, &vb))| *o = scale * (va - factor * vb));
        Ok(out)
    }

    /// Release a field back to the budget
    ///
    /// Equivalent to dropping it; the field cannot be used afterwards.
    pub fn release(&self, field: Field) {
        drop(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        // 16x16 single channel = 1024 bytes
        let manager = TextureManager::new(Some(2048));
        let a = manager.create(16, 16, 1).unwrap();
        let b = manager.create(16, 16, 1).unwrap();
        assert_eq!(manager.bytes_in_use(), 2048);

        let err = manager.create(1, 1, 1).unwrap_err();
        assert!(matches!(err, ErosionError::ResourceExhausted { budget: 2048, .. }));

        // Failed allocation leaves siblings untouched and owned by the caller
        assert_eq!(manager.live_fields(), 2);
        manager.release(a);
        assert_eq!(manager.bytes_in_use(), 1024);
        drop(b);
        assert_eq!(manager.bytes_in_use(), 0);
        assert_eq!(manager.live_fields(), 0);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let manager = TextureManager::unbounded();
        assert_eq!(
            manager.create(4, 4, 5).unwrap_err(),
            ErosionError::UnsupportedChannelCount(5)
        );
        assert!(matches!(
            manager.create(0, 4, 1),
            Err(ErosionError::InvalidSource(_))
        ));
        assert!(manager.create_from(2, 2, 1, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let manager = TextureManager::unbounded();
        let mut a = manager.create(3, 3, 2).unwrap();
        a.set(1, 1, 1, 7.0);
        let b = manager.clone_field(&a).unwrap();
        a.set(1, 1, 1, 0.0);
        assert_eq!(b.get(1, 1, 1), 7.0);
        assert_eq!(manager.live_fields(), 2);
    }

    #[test]
    fn test_resize_same_size_is_exact() {
        let manager = TextureManager::unbounded();
        let data: Vec<f32> = (0..16).map(|i| i as f32 * 0.37).collect();
        let a = manager.create_from(4, 4, 1, data.clone()).unwrap();
        let b = manager.resize(&a, 4, 4).unwrap();
        assert_eq!(b.as_slice(), data.as_slice());
    }

    #[test]
    fn test_resize_constant_field() {
        let manager = TextureManager::unbounded();
        let a = manager.create_filled(8, 8, 1, 0.25).unwrap();
        let up = manager.resize(&a, 13, 5).unwrap();
        assert!(up.as_slice().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_scaled_difference_add() {
        let manager = TextureManager::unbounded();
        let a = manager.create_filled(2, 2, 1, 3.0).unwrap();
        let b = manager.create_filled(2, 2, 1, 1.0).unwrap();
        let diff = manager.scaled_difference(&a, &b, 1.0, 2.0).unwrap();
        assert!(diff.as_slice().iter().all(|&v| v == 4.0));
        let sum = manager.scaled_difference(&a, &b, -1.0, 1.0).unwrap();
        assert!(sum.as_slice().iter().all(|&v| v == 4.0));

        let c = manager.create(3, 2, 1).unwrap();
        assert!(manager.scaled_difference(&a, &c, 1.0, 1.0).is_err());
    }
}
