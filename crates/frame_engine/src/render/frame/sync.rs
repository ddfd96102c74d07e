//! Frame-in-flight synchronization
//!
//! Each frame slot owns an image-acquired signal, a render-complete signal
//! and a CPU-wait fence. Slots are used round-robin regardless of which
//! image the presentation layer hands out.
//!
//! Slot states:
//!
//! - `Complete`: the fence has been observed signaled (or was created
//!   signaled) and not yet reset.
//! - `ReadyToSubmit`: the fence is reset and nothing is pending on it.
//! - `GpuExecuting`: a submission will signal the fence.
//!
//! A slot is only waited on while `GpuExecuting` or `Complete`, so a tick
//! dropped between reset and submission never leaves a wait that nothing
//! can satisfy. Once a slot's fence is observed signaled, the images it
//! rendered are no longer owned by it.

use bitflags::bitflags;

use crate::render::api::{FenceHandle, FenceStatus, GpuBackend, GpuResult, SemaphoreHandle};

bitflags! {
    /// Signals a failed tick left in a state the next use must repair
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StaleSignals: u8 {
        /// The acquire signal was raised and nothing consumed it
        const IMAGE_ACQUIRED = 1 << 0;
        /// Presentation failed, so the render-complete signal may still be raised
        const RENDER_COMPLETE = 1 << 1;
    }
}

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlotState {
    /// Fence reset, nothing pending; commands may be recorded and submitted
    ReadyToSubmit,
    /// A submission will signal the fence
    GpuExecuting,
    /// Fence observed signaled
    Complete,
}

/// Synchronization primitives of one frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Fired by the presentation layer when the acquired image is free
    pub image_acquired: SemaphoreHandle,
    /// Fired by the graphics queue when rendering retires
    pub render_complete: SemaphoreHandle,
    /// Fired when the slot's submission retires; observed by the CPU
    pub in_flight: FenceHandle,
    /// Current state
    pub state: FrameSlotState,
    /// Signals to repair before the slot is used again
    pub stale: StaleSignals,
}

/// Result of a bounded wait on a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWait {
    /// The slot may be used
    Ready {
        /// Whether the CPU had to wait on in-flight work
        blocked: bool,
    },
    /// The wait timed out; the tick should be dropped
    TimedOut,
}

/// The set of frame slots and the image ownership table
#[derive(Debug)]
pub struct FrameSyncSet {
    slots: Vec<FrameSlot>,
    current: usize,
    image_owners: Vec<Option<usize>>,
}

impl FrameSyncSet {
    /// Create `frames_in_flight` slots with signaled fences
    ///
    /// Everything created so far is released if a later creation fails.
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &mut B,
        frames_in_flight: usize,
        image_count: usize,
    ) -> GpuResult<Self> {
        let mut set = Self {
            slots: Vec::with_capacity(frames_in_flight),
            current: 0,
            image_owners: vec![None; image_count],
        };

        for _ in 0..frames_in_flight {
            match Self::create_slot(backend) {
                Ok(slot) => set.slots.push(slot),
                Err(error) => {
                    set.destroy(backend);
                    return Err(error);
                }
            }
        }

        log::debug!("Created {frames_in_flight} frame slots for {image_count} images");
        Ok(set)
    }

    fn create_slot<B: GpuBackend + ?Sized>(backend: &mut B) -> GpuResult<FrameSlot> {
        let image_acquired = backend.create_semaphore()?;
        let render_complete = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(error) => {
                backend.destroy_semaphore(image_acquired);
                return Err(error);
            }
        };
        let in_flight = match backend.create_fence(true) {
            Ok(fence) => fence,
            Err(error) => {
                backend.destroy_semaphore(render_complete);
                backend.destroy_semaphore(image_acquired);
                return Err(error);
            }
        };

        Ok(FrameSlot {
            image_acquired,
            render_complete,
            in_flight,
            state: FrameSlotState::Complete,
            stale: StaleSignals::empty(),
        })
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the active slot
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The active slot
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// State of a slot
    pub fn slot_state(&self, index: usize) -> Option<FrameSlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Prepare the active slot for recording
    ///
    /// Waits for the slot's previous submission if it is still executing,
    /// then resets the fence. A slot left `ReadyToSubmit` by a dropped tick
    /// is reused as is. A stale render-complete signal is replaced once the
    /// submission that raised it has retired.
    pub fn begin_frame<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        timeout_ns: u64,
    ) -> GpuResult<SlotWait> {
        let index = self.current;
        let slot = &mut self.slots[index];
        let blocked = slot.state == FrameSlotState::GpuExecuting;

        match slot.state {
            FrameSlotState::ReadyToSubmit => return Ok(SlotWait::Ready { blocked: false }),
            FrameSlotState::GpuExecuting | FrameSlotState::Complete => {
                if backend.wait_for_fence(slot.in_flight, timeout_ns)? == FenceStatus::TimedOut {
                    log::warn!("Frame slot {index} fence wait timed out");
                    return Ok(SlotWait::TimedOut);
                }
                slot.state = FrameSlotState::Complete;
            }
        }
        self.release_images_of(index);

        if self.slots[index].stale.contains(StaleSignals::RENDER_COMPLETE) {
            self.replace_render_complete(backend, index)?;
        }

        let slot = &mut self.slots[index];
        backend.reset_fence(slot.in_flight)?;
        slot.state = FrameSlotState::ReadyToSubmit;
        Ok(SlotWait::Ready { blocked })
    }

    fn replace_render_complete<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> GpuResult<()> {
        let fresh = backend.create_semaphore()?;
        let slot = &mut self.slots[index];
        let stale = std::mem::replace(&mut slot.render_complete, fresh);
        slot.stale.remove(StaleSignals::RENDER_COMPLETE);
        backend.destroy_semaphore(stale);
        log::debug!("Replaced render-complete signal of frame slot {index}");
        Ok(())
    }

    fn release_images_of(&mut self, index: usize) {
        self.image_owners
            .iter_mut()
            .filter(|owner| **owner == Some(index))
            .for_each(|owner| *owner = None);
    }

    /// Make sure no other slot's executing submission still uses `image_index`
    ///
    /// Per-image resources are rewritten after this returns `Ready`. The
    /// other slot's fence is only waited on, never reset.
    pub fn claim_image<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image_index: u32,
        timeout_ns: u64,
    ) -> GpuResult<SlotWait> {
        let owner = self.image_owners.get(image_index as usize).copied().flatten();
        let Some(owner) = owner.filter(|owner| *owner != self.current) else {
            return Ok(SlotWait::Ready { blocked: false });
        };

        let slot = &mut self.slots[owner];
        if slot.state != FrameSlotState::GpuExecuting {
            return Ok(SlotWait::Ready { blocked: false });
        }

        if backend.wait_for_fence(slot.in_flight, timeout_ns)? == FenceStatus::TimedOut {
            log::warn!("Image {image_index} still in use by frame slot {owner}");
            return Ok(SlotWait::TimedOut);
        }
        slot.state = FrameSlotState::Complete;
        self.release_images_of(owner);
        Ok(SlotWait::Ready { blocked: true })
    }

    /// Record that the active slot's commands for `image_index` were submitted
    pub fn mark_submitted(&mut self, image_index: u32) {
        if let Some(owner) = self.image_owners.get_mut(image_index as usize) {
            *owner = Some(self.current);
        }
        self.slots[self.current].state = FrameSlotState::GpuExecuting;
    }

    /// Record that a command-less submission consumed the acquire signal and
    /// will signal the active slot's fence
    pub fn mark_released(&mut self) {
        let slot = &mut self.slots[self.current];
        slot.state = FrameSlotState::GpuExecuting;
        slot.stale.remove(StaleSignals::IMAGE_ACQUIRED);
    }

    /// Flag signals of the active slot that the next use must repair
    pub fn mark_stale(&mut self, signals: StaleSignals) {
        self.slots[self.current].stale.insert(signals);
    }

    /// Move to the next slot, round-robin
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len().max(1);
    }

    /// Release every primitive; the device must be idle
    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for slot in self.slots.drain(..) {
            backend.destroy_fence(slot.in_flight);
            backend.destroy_semaphore(slot.render_complete);
            backend.destroy_semaphore(slot.image_acquired);
        }
        self.image_owners.iter_mut().for_each(|owner| *owner = None);
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::Submission;
    use crate::render::backends::mock::{MockEvent, MockGpu, Violation};

    fn submit_current(gpu: &mut MockGpu, sync: &mut FrameSyncSet, image_index: u32) {
        let slot = *sync.current();
        gpu.submit(
            sync.current_index(),
            &Submission {
                wait: None,
                signal: None,
                fence: Some(slot.in_flight),
                has_commands: false,
            },
        )
        .unwrap();
        sync.mark_submitted(image_index);
    }

    #[test]
    fn slots_start_complete_with_signaled_fences() {
        let mut gpu = MockGpu::new(3);
        let mut sync = FrameSyncSet::new(&mut gpu, 2, 3).unwrap();

        assert_eq!(sync.frames_in_flight(), 2);
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::Complete));

        // First use does not block and leaves the slot ready
        assert_eq!(
            sync.begin_frame(&mut gpu, u64::MAX).unwrap(),
            SlotWait::Ready { blocked: false }
        );
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::ReadyToSubmit));
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn reuse_waits_for_the_previous_submission() {
        let mut gpu = MockGpu::new(3);
        let mut sync = FrameSyncSet::new(&mut gpu, 1, 3).unwrap();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        submit_current(&mut gpu, &mut sync, 0);
        sync.advance();
        assert_eq!(gpu.outstanding(), 1);

        assert_eq!(
            sync.begin_frame(&mut gpu, u64::MAX).unwrap(),
            SlotWait::Ready { blocked: true }
        );
        assert_eq!(gpu.outstanding(), 0);

        let fence = sync.current().in_flight;
        let events = gpu.events();
        let observed = events.iter().rposition(|e| *e == MockEvent::FenceObserved(fence));
        let reset = events.iter().rposition(|e| *e == MockEvent::FenceReset(fence));
        assert!(observed.is_some() && reset.is_some());
        assert!(observed < reset);
    }

    #[test]
    fn timed_out_wait_keeps_the_slot_executing() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 1, 2).unwrap();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        submit_current(&mut gpu, &mut sync, 0);

        gpu.stall_fence_waits(1);
        assert_eq!(sync.begin_frame(&mut gpu, 1_000).unwrap(), SlotWait::TimedOut);
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::GpuExecuting));

        assert_eq!(
            sync.begin_frame(&mut gpu, 1_000).unwrap(),
            SlotWait::Ready { blocked: true }
        );
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn dropped_tick_after_reset_does_not_wait_again() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 1, 2).unwrap();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        // Nothing submitted: the tick was dropped after the reset
        sync.advance();

        assert_eq!(
            sync.begin_frame(&mut gpu, u64::MAX).unwrap(),
            SlotWait::Ready { blocked: false }
        );
        assert!(!gpu
            .violations()
            .iter()
            .any(|violation| matches!(violation, Violation::StuckWait(_))));
    }

    #[test]
    fn claiming_an_image_waits_on_its_last_user() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 2, 2).unwrap();

        // Slot 0 renders image 0 and stays in flight
        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        submit_current(&mut gpu, &mut sync, 0);
        sync.advance();

        // Slot 1 is handed image 0 as well
        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        assert_eq!(
            sync.claim_image(&mut gpu, 0, u64::MAX).unwrap(),
            SlotWait::Ready { blocked: true }
        );
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::Complete));
        assert_eq!(gpu.outstanding(), 0);

        // Slot 0's fence is not reset by the claim
        let slot0_fence = sync.slots[0].in_flight;
        let resets = |gpu: &MockGpu| {
            gpu.events()
                .iter()
                .filter(|e| **e == MockEvent::FenceReset(slot0_fence))
                .count()
        };
        assert_eq!(resets(&gpu), 1);

        // Back on slot 0 the fence is already observed; begin_frame resets it
        sync.advance();
        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::ReadyToSubmit));
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn reused_slot_gives_up_its_earlier_images() {
        let mut gpu = MockGpu::new(3);
        let mut sync = FrameSyncSet::new(&mut gpu, 2, 3).unwrap();

        for image_index in 0..3 {
            sync.begin_frame(&mut gpu, u64::MAX).unwrap();
            submit_current(&mut gpu, &mut sync, image_index);
            sync.advance();
        }

        // Slot 1 comes back for image 0, last drawn by slot 0 before its
        // fence was observed; slot 0 is now busy with image 2
        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        assert_eq!(gpu.outstanding(), 1);
        assert_eq!(
            sync.claim_image(&mut gpu, 0, u64::MAX).unwrap(),
            SlotWait::Ready { blocked: false }
        );
        assert_eq!(gpu.outstanding(), 1);
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::GpuExecuting));
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn stale_render_complete_is_replaced_after_the_fence() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 1, 2).unwrap();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        submit_current(&mut gpu, &mut sync, 0);
        sync.mark_stale(StaleSignals::RENDER_COMPLETE);
        let stale = sync.current().render_complete;
        sync.advance();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();

        assert_ne!(sync.current().render_complete, stale);
        assert!(sync.current().stale.is_empty());
        assert_eq!(gpu.live_semaphores(), 2);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn release_clears_a_stale_acquire_signal() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 1, 2).unwrap();

        sync.begin_frame(&mut gpu, u64::MAX).unwrap();
        sync.mark_stale(StaleSignals::IMAGE_ACQUIRED);
        assert!(sync.current().stale.contains(StaleSignals::IMAGE_ACQUIRED));

        sync.mark_released();
        assert!(sync.current().stale.is_empty());
        assert_eq!(sync.slot_state(0), Some(FrameSlotState::GpuExecuting));
    }

    #[test]
    fn round_robin_wraps() {
        let mut gpu = MockGpu::new(3);
        let mut sync = FrameSyncSet::new(&mut gpu, 3, 3).unwrap();

        let visited: Vec<_> = (0..7)
            .map(|_| {
                let index = sync.current_index();
                sync.advance();
                index
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn destroy_releases_every_primitive() {
        let mut gpu = MockGpu::new(2);
        let mut sync = FrameSyncSet::new(&mut gpu, 2, 2).unwrap();
        assert_eq!(gpu.live_semaphores(), 4);
        assert_eq!(gpu.live_fences(), 2);

        sync.destroy(&mut gpu);
        sync.destroy(&mut gpu);
        assert_eq!(gpu.live_semaphores(), 0);
        assert_eq!(gpu.live_fences(), 0);
        assert!(gpu.violations().is_empty());
    }
}
