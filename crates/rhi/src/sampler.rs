//! Sampler creation.
//!
//! Samplers are created through the [`SamplerAllocator`] seam so that batch
//! creation can be exercised without a GPU. [`create_all`] is all-or-nothing:
//! when one sampler in a batch fails, the ones already created are destroyed
//! before the error is returned.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::RhiResult;

/// Creates and destroys raw sampler handles.
pub trait SamplerAllocator {
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
}

impl SamplerAllocator for Device {
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler> {
        let sampler = unsafe { self.handle().create_sampler(info, None)? };
        self.ledger().track("sampler");
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.handle().destroy_sampler(sampler, None) };
        self.ledger().release("sampler");
    }
}

/// Filtering preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerKind {
    /// Nearest filtering, clamp to edge. Used for GBuffer reads.
    NearestClamp,
    /// Linear filtering, clamp to edge.
    LinearClamp,
}

impl SamplerKind {
    pub fn create_info(self) -> vk::SamplerCreateInfo<'static> {
        let filter = match self {
            SamplerKind::NearestClamp => vk::Filter::NEAREST,
            SamplerKind::LinearClamp => vk::Filter::LINEAR,
        };
        vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(vk::LOD_CLAMP_NONE)
            .unnormalized_coordinates(false)
    }
}

/// Creates one sampler per entry in `infos`.
///
/// # Errors
///
/// Returns the first creation error. Samplers created before it are destroyed.
pub fn create_all<A: SamplerAllocator + ?Sized>(
    allocator: &A,
    infos: &[vk::SamplerCreateInfo<'_>],
) -> RhiResult<Vec<vk::Sampler>> {
    let mut created = Vec::with_capacity(infos.len());
    for (i, info) in infos.iter().enumerate() {
        match allocator.create_sampler(info) {
            Ok(sampler) => created.push(sampler),
            Err(e) => {
                warn!(
                    "Sampler {} of {} failed, destroying {} already created",
                    i + 1,
                    infos.len(),
                    created.len()
                );
                for sampler in created.drain(..) {
                    allocator.destroy_sampler(sampler);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Owned sampler handle.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a single sampler.
    ///
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn new(device: Arc<Device>, kind: SamplerKind) -> RhiResult<Self> {
        let sampler = device.create_sampler(&kind.create_info())?;
        debug!("Created {:?} sampler", kind);
        Ok(Self { device, sampler })
    }

    /// Creates `count` samplers of the same kind, all or nothing.
    ///
    /// # Errors
    ///
    /// See [`create_all`].
    pub fn new_batch(device: Arc<Device>, kind: SamplerKind, count: usize) -> RhiResult<Vec<Self>> {
        let infos = vec![kind.create_info(); count];
        let handles = create_all(device.as_ref(), &infos)?;
        debug!("Created {} {:?} sampler(s)", handles.len(), kind);
        Ok(handles
            .into_iter()
            .map(|sampler| Self {
                device: device.clone(),
                sampler,
            })
            .collect())
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use ash::vk::Handle;

    use super::*;
    use crate::error::RhiError;

    /// Hands out fake handles and fails once `fail_at` creations succeeded.
    struct CountingAllocator {
        fail_at: usize,
        created: Cell<usize>,
        destroyed: Cell<usize>,
    }

    impl CountingAllocator {
        fn failing_after(fail_at: usize) -> Self {
            Self {
                fail_at,
                created: Cell::new(0),
                destroyed: Cell::new(0),
            }
        }
    }

    impl SamplerAllocator for CountingAllocator {
        fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> RhiResult<vk::Sampler> {
            let n = self.created.get();
            if n == self.fail_at {
                return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.created.set(n + 1);
            Ok(vk::Sampler::from_raw(n as u64 + 1))
        }

        fn destroy_sampler(&self, _sampler: vk::Sampler) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn test_partial_failure_destroys_created_samplers() {
        let allocator = CountingAllocator::failing_after(3);
        let infos = vec![SamplerKind::NearestClamp.create_info(); 5];

        let result = create_all(&allocator, &infos);

        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(allocator.created.get(), 3);
        assert_eq!(allocator.destroyed.get(), 3);
    }

    #[test]
    fn test_full_success_keeps_all_samplers() {
        let allocator = CountingAllocator::failing_after(usize::MAX);
        let infos = vec![SamplerKind::LinearClamp.create_info(); 5];

        let samplers = create_all(&allocator, &infos).unwrap();

        assert_eq!(samplers.len(), 5);
        assert_eq!(allocator.destroyed.get(), 0);
    }

    #[test]
    fn test_first_failure_destroys_nothing() {
        let allocator = CountingAllocator::failing_after(0);
        let infos = vec![SamplerKind::LinearClamp.create_info(); 2];

        assert!(create_all(&allocator, &infos).is_err());
        assert_eq!(allocator.destroyed.get(), 0);
    }

    #[test]
    fn test_sampler_kind_filters() {
        let info = SamplerKind::NearestClamp.create_info();
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(
            SamplerKind::LinearClamp.create_info().min_filter,
            vk::Filter::LINEAR
        );
    }
}
