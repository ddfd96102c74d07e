//! Image chain acquisition
//!
//! Wraps the presentation layer's rotating pool of images. A stale or
//! unavailable image is a per-frame outcome, not an error: the caller drops
//! the tick and tries again on the next one.

use crate::render::api::{AcquireOutcome, GpuBackend, GpuError, GpuResult, SemaphoreHandle};

/// Why no image could be used this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The chain no longer matches the surface
    OutOfDate,
    /// The acquire timeout elapsed
    Timeout,
    /// No image was free and the caller asked not to wait
    NotReady,
}

/// Result of [`ImageChain::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAcquire {
    /// Image-chain slot to render into
    Ready(u32),
    /// Skip this tick
    Stale(StaleReason),
}

/// The fixed pool of presentable images
#[derive(Debug)]
pub struct ImageChain {
    image_count: usize,
    extent: (u32, u32),
    suboptimal_reported: bool,
}

impl ImageChain {
    /// Read the negotiated image count and extent from the backend
    pub fn new<B: GpuBackend + ?Sized>(backend: &B) -> GpuResult<Self> {
        let image_count = backend.image_count();
        if image_count == 0 {
            return Err(GpuError::InitializationFailed(
                "presentation surface offered no images".to_string(),
            ));
        }

        let extent = backend.surface_extent();
        log::debug!("Image chain: {image_count} images at {}x{}", extent.0, extent.1);

        Ok(Self {
            image_count,
            extent,
            suboptimal_reported: false,
        })
    }

    /// Number of image-chain slots
    pub fn image_count(&self) -> usize {
        self.image_count
    }

    /// Extent negotiated at startup
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Acquire the next image; `image_acquired` fires once it is free
    pub fn acquire<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image_acquired: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GpuResult<ImageAcquire> {
        match backend.acquire_next_image(image_acquired, timeout_ns)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if image_index as usize >= self.image_count {
                    return Err(GpuError::invalid(format!(
                        "acquired image {image_index} outside a chain of {}",
                        self.image_count
                    )));
                }
                if suboptimal && !self.suboptimal_reported {
                    log::warn!("Surface is suboptimal for the image chain; continuing without recreation");
                    self.suboptimal_reported = true;
                }
                Ok(ImageAcquire::Ready(image_index))
            }
            AcquireOutcome::OutOfDate => Ok(ImageAcquire::Stale(StaleReason::OutOfDate)),
            AcquireOutcome::Timeout => Ok(ImageAcquire::Stale(StaleReason::Timeout)),
            AcquireOutcome::NotReady => Ok(ImageAcquire::Stale(StaleReason::NotReady)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::mock::MockGpu;

    #[test]
    fn unscripted_acquires_rotate_through_images() {
        let mut gpu = MockGpu::new(3);
        let semaphore = gpu.create_semaphore().unwrap();
        let mut chain = ImageChain::new(&gpu).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            match chain.acquire(&mut gpu, semaphore, u64::MAX).unwrap() {
                ImageAcquire::Ready(index) => seen.push(index),
                ImageAcquire::Stale(reason) => panic!("unexpected {reason:?}"),
            }
            // Consume the signal the way a submission would
            gpu.submit(0, &crate::render::api::Submission {
                wait: Some(semaphore),
                signal: None,
                fence: None,
                has_commands: false,
            })
            .unwrap();
        }

        assert_eq!(seen, vec![0, 1, 2, 0]);
        assert_eq!(chain.image_count(), 3);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn stale_outcomes_are_not_errors() {
        let mut gpu = MockGpu::new(2);
        let semaphore = gpu.create_semaphore().unwrap();
        gpu.script_acquire(AcquireOutcome::OutOfDate);
        gpu.script_acquire(AcquireOutcome::Timeout);
        gpu.script_acquire(AcquireOutcome::NotReady);
        let mut chain = ImageChain::new(&gpu).unwrap();

        assert_eq!(
            chain.acquire(&mut gpu, semaphore, 0).unwrap(),
            ImageAcquire::Stale(StaleReason::OutOfDate)
        );
        assert_eq!(
            chain.acquire(&mut gpu, semaphore, 0).unwrap(),
            ImageAcquire::Stale(StaleReason::Timeout)
        );
        assert_eq!(
            chain.acquire(&mut gpu, semaphore, 0).unwrap(),
            ImageAcquire::Stale(StaleReason::NotReady)
        );
    }

    #[test]
    fn suboptimal_image_is_still_used() {
        let mut gpu = MockGpu::new(2);
        let semaphore = gpu.create_semaphore().unwrap();
        gpu.script_acquire(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        });
        let mut chain = ImageChain::new(&gpu).unwrap();

        assert_eq!(chain.acquire(&mut gpu, semaphore, 0).unwrap(), ImageAcquire::Ready(1));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut gpu = MockGpu::new(2);
        let semaphore = gpu.create_semaphore().unwrap();
        gpu.script_acquire(AcquireOutcome::Acquired {
            image_index: 5,
            suboptimal: false,
        });
        let mut chain = ImageChain::new(&gpu).unwrap();

        assert!(chain.acquire(&mut gpu, semaphore, 0).is_err());
    }

    #[test]
    fn empty_chain_fails_initialization() {
        let gpu = MockGpu::new(0);
        assert!(matches!(ImageChain::new(&gpu), Err(GpuError::InitializationFailed(_))));
    }
}
