//! Scripted in-memory backend for frame pipeline tests
//!
//! Submitted work retires lazily: a submission completes only when the CPU
//! waits on its fence, waits for idle, or performs a blocking copy. That
//! makes every missing wait show up as outstanding work or a violation.
//! State lives behind an `Rc`, so a clone handed to a renderer can still be
//! inspected after the renderer is dropped.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::render::api::{
    AcquireOutcome, BufferHandle, BufferUsage, FenceHandle, FenceStatus, GpuBackend, GpuError,
    GpuResult, MemoryLocation, PipelineDesc, PipelineHandle, PresentOutcome, SemaphoreHandle,
    Submission, UniformSetHandle,
};
use crate::render::frame::command_recorder::{CommandSequence, DrawCall};

/// Misuse the mock detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Waited on a fence with nothing pending that could ever signal it
    StuckWait(FenceHandle),
    /// A uniform buffer was written while a pending submission reads it
    UniformWriteInFlight(BufferHandle),
    /// A frame slot was re-recorded while its previous submission is pending
    RecordWhilePending(usize),
    /// A submission or present waited on a signal that was never raised
    SemaphoreNotSignaled(SemaphoreHandle),
    /// A signal was raised again before anything consumed it
    SemaphoreAlreadySignaled(SemaphoreHandle),
    /// A fence was submitted or reset while still in use
    FenceInUse(FenceHandle),
    /// A handle was destroyed twice or never existed
    UnknownHandle(u64),
    /// A resource was destroyed while pending work references it
    DestroyedInUse(u64),
}

/// Observable call made against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// `acquire_next_image` returned
    Acquire {
        /// Signal handed to the presentation layer
        semaphore: SemaphoreHandle,
        /// What the caller got back
        outcome: AcquireOutcome,
    },
    /// A fence wait observed the fence signaled
    FenceObserved(FenceHandle),
    /// A fence was reset
    FenceReset(FenceHandle),
    /// Commands were recorded into a frame slot
    Record {
        /// Frame slot recorded into
        frame_slot: usize,
    },
    /// Work was submitted
    Submit {
        /// Frame slot submitted
        frame_slot: usize,
        /// Fence signaled on completion
        fence: Option<FenceHandle>,
        /// Whether recorded commands were included
        has_commands: bool,
    },
    /// An image was queued for presentation
    Present {
        /// Image-chain slot presented
        image_index: u32,
    },
    /// Misuse
    Violation(Violation),
}

/// A submission the mock executed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedFrame {
    /// Frame slot used
    pub frame_slot: usize,
    /// Image-chain slot rendered into
    pub image_index: Option<u32>,
    /// Draws issued, in order
    pub draws: Vec<DrawCall>,
    /// Uniform bytes visible to the first draw at submission time
    pub uniform_bytes: Option<Vec<u8>>,
}

#[derive(Debug)]
struct MockBuffer {
    usage: BufferUsage,
    location: MemoryLocation,
    data: Vec<u8>,
}

#[derive(Debug)]
struct PendingWork {
    frame_slot: usize,
    has_commands: bool,
    fence: Option<FenceHandle>,
    buffers: Vec<BufferHandle>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    image_count: usize,
    extent: (u32, u32),
    next_image: u32,

    buffers: HashMap<u64, MockBuffer>,
    semaphores: HashMap<u64, bool>,
    fences: HashMap<u64, bool>,
    pipelines: HashSet<u64>,
    uniform_sets: HashMap<u64, BufferHandle>,
    recorded: HashMap<usize, CommandSequence>,
    pending: VecDeque<PendingWork>,

    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    buffer_failure_countdown: Option<usize>,
    copy_failure: Option<GpuError>,
    submit_failures: VecDeque<GpuError>,
    present_failure: Option<GpuError>,
    record_failure: Option<GpuError>,
    stalled_waits: usize,
    device_lost: bool,

    events: Vec<MockEvent>,
    frames: Vec<ExecutedFrame>,
    buffers_created: usize,
    max_outstanding: usize,
    wait_idle_calls: usize,
}

impl MockState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn violation(&mut self, violation: Violation) {
        self.events.push(MockEvent::Violation(violation));
    }

    fn check_device(&self) -> GpuResult<()> {
        if self.device_lost {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn retire_front(&mut self) -> Option<PendingWork> {
        let work = self.pending.pop_front()?;
        if let Some(fence) = work.fence {
            self.fences.insert(fence.0, true);
        }
        Some(work)
    }

    fn retire_through(&mut self, fence: FenceHandle) {
        while let Some(work) = self.retire_front() {
            if work.fence == Some(fence) {
                break;
            }
        }
    }

    fn retire_all(&mut self) {
        while self.retire_front().is_some() {}
    }

    fn is_pending(&self, fence: FenceHandle) -> bool {
        self.pending.iter().any(|work| work.fence == Some(fence))
    }

    fn buffer_in_flight(&self, buffer: BufferHandle) -> bool {
        self.pending.iter().any(|work| work.buffers.contains(&buffer))
    }

    fn consume_signal(&mut self, semaphore: SemaphoreHandle) {
        match self.semaphores.get_mut(&semaphore.0) {
            Some(signaled) if *signaled => *signaled = false,
            _ => self.violation(Violation::SemaphoreNotSignaled(semaphore)),
        }
    }

    fn buffers_read_by(&self, sequence: &CommandSequence) -> Vec<BufferHandle> {
        let mut buffers = Vec::new();
        for draw in sequence.draws() {
            buffers.extend(draw.vertex_buffer);
            buffers.extend(draw.index_buffer);
            if let Some(set) = draw.uniform_set.and_then(|set| self.uniform_sets.get(&set.0)) {
                buffers.push(*set);
            }
        }
        buffers
    }
}

/// In-memory [`GpuBackend`] with scripted outcomes and failure injection
#[derive(Debug, Clone)]
pub struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    /// Mock with `image_count` presentable images and an 800x600 surface
    pub fn new(image_count: usize) -> Self {
        let state = MockState {
            image_count,
            extent: (800, 600),
            ..MockState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Queue the outcome of a future acquire; unscripted acquires rotate
    /// through the images
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state_mut().acquire_script.push_back(outcome);
    }

    /// Queue the outcome of a future present
    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state_mut().present_script.push_back(outcome);
    }

    /// Let `successes` more buffer creations succeed, then fail one
    pub fn fail_buffer_creation_after(&self, successes: usize) {
        self.state_mut().buffer_failure_countdown = Some(successes);
    }

    /// Fail the next blocking copy
    pub fn fail_next_copy(&self, error: GpuError) {
        self.state_mut().copy_failure = Some(error);
    }

    /// Fail the next submission; repeated calls fail consecutive submissions
    pub fn fail_next_submit(&self, error: GpuError) {
        self.state_mut().submit_failures.push_back(error);
    }

    /// Fail the next present
    pub fn fail_next_present(&self, error: GpuError) {
        self.state_mut().present_failure = Some(error);
    }

    /// Fail the next command recording
    pub fn fail_next_record(&self, error: GpuError) {
        self.state_mut().record_failure = Some(error);
    }

    /// Make the next `count` waits on pending fences time out
    pub fn stall_fence_waits(&self, count: usize) {
        self.state_mut().stalled_waits = count;
    }

    /// Every later call reports device loss
    pub fn lose_device(&self) {
        self.state_mut().device_lost = true;
    }

    /// Contents of a live buffer
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer.0).map(|b| b.data.clone())
    }

    /// Memory location of a live buffer
    pub fn buffer_location(&self, buffer: BufferHandle) -> Option<MemoryLocation> {
        self.state().buffers.get(&buffer.0).map(|b| b.location)
    }

    /// Usage flags of a live buffer
    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.state().buffers.get(&buffer.0).map(|b| b.usage)
    }

    /// Live buffers of any kind
    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    /// Live host-visible transfer sources
    pub fn live_staging_buffers(&self) -> usize {
        self.state()
            .buffers
            .values()
            .filter(|b| {
                b.location == MemoryLocation::HostVisible && b.usage.contains(BufferUsage::TRANSFER_SRC)
            })
            .count()
    }

    /// Buffers ever created
    pub fn buffers_created(&self) -> usize {
        self.state().buffers_created
    }

    /// Live semaphores
    pub fn live_semaphores(&self) -> usize {
        self.state().semaphores.len()
    }

    /// Live fences
    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }

    /// Live pipelines
    pub fn live_pipelines(&self) -> usize {
        self.state().pipelines.len()
    }

    /// Live uniform sets
    pub fn live_uniform_sets(&self) -> usize {
        self.state().uniform_sets.len()
    }

    /// Submissions not yet retired
    pub fn outstanding(&self) -> usize {
        self.state().pending.len()
    }

    /// Most submissions ever outstanding at once
    pub fn max_outstanding(&self) -> usize {
        self.state().max_outstanding
    }

    /// Number of `wait_idle` calls
    pub fn wait_idle_calls(&self) -> usize {
        self.state().wait_idle_calls
    }

    /// Every call observed so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Misuse observed so far
    pub fn violations(&self) -> Vec<Violation> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Violation(violation) => Some(violation.clone()),
                _ => None,
            })
            .collect()
    }

    /// Submissions that carried commands, in submission order
    pub fn frames(&self) -> Vec<ExecutedFrame> {
        self.state().frames.clone()
    }

    /// Number of submissions, with or without commands
    pub fn submissions(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, MockEvent::Submit { .. }))
            .count()
    }

    /// Images presented, in order
    pub fn presented(&self) -> Vec<u32> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Present { image_index } => Some(*image_index),
                _ => None,
            })
            .collect()
    }
}

impl GpuBackend for MockGpu {
    fn image_count(&self) -> usize {
        self.state().image_count
    }

    fn surface_extent(&self) -> (u32, u32) {
        self.state().extent
    }

    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle> {
        let mut state = self.state_mut();
        state.check_device()?;
        let id = state.allocate_id();
        state.semaphores.insert(id, false);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        let mut state = self.state_mut();
        if state.semaphores.remove(&semaphore.0).is_none() {
            state.violation(Violation::UnknownHandle(semaphore.0));
        }
    }

    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle> {
        let mut state = self.state_mut();
        state.check_device()?;
        let id = state.allocate_id();
        state.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let mut state = self.state_mut();
        if state.is_pending(fence) {
            state.violation(Violation::DestroyedInUse(fence.0));
        }
        if state.fences.remove(&fence.0).is_none() {
            state.violation(Violation::UnknownHandle(fence.0));
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, _timeout_ns: u64) -> GpuResult<FenceStatus> {
        let mut state = self.state_mut();
        state.check_device()?;

        let signaled = *state
            .fences
            .get(&fence.0)
            .ok_or(GpuError::ResourceNotFound { id: fence.0 })?;
        if signaled {
            state.events.push(MockEvent::FenceObserved(fence));
            return Ok(FenceStatus::Signaled);
        }

        if !state.is_pending(fence) {
            state.violation(Violation::StuckWait(fence));
            return Ok(FenceStatus::TimedOut);
        }

        if state.stalled_waits > 0 {
            state.stalled_waits -= 1;
            return Ok(FenceStatus::TimedOut);
        }

        state.retire_through(fence);
        state.events.push(MockEvent::FenceObserved(fence));
        Ok(FenceStatus::Signaled)
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.check_device()?;
        if state.is_pending(fence) {
            state.violation(Violation::FenceInUse(fence));
            return Err(GpuError::invalid("reset of a fence with pending work"));
        }
        let signaled = state
            .fences
            .get_mut(&fence.0)
            .ok_or(GpuError::ResourceNotFound { id: fence.0 })?;
        *signaled = false;
        state.events.push(MockEvent::FenceReset(fence));
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> GpuResult<BufferHandle> {
        let mut state = self.state_mut();
        state.check_device()?;

        match state.buffer_failure_countdown {
            Some(0) => {
                state.buffer_failure_countdown = None;
                return Err(GpuError::OutOfMemory { requested: size });
            }
            Some(remaining) => state.buffer_failure_countdown = Some(remaining - 1),
            None => {}
        }

        let len = usize::try_from(size).map_err(|_| GpuError::OutOfMemory { requested: size })?;
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            MockBuffer {
                usage,
                location,
                data: vec![0; len],
            },
        );
        state.buffers_created += 1;
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let mut state = self.state_mut();
        if state.buffer_in_flight(buffer) {
            state.violation(Violation::DestroyedInUse(buffer.0));
        }
        if state.buffers.remove(&buffer.0).is_none() {
            state.violation(Violation::UnknownHandle(buffer.0));
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.check_device()?;
        if state.buffer_in_flight(buffer) {
            state.violation(Violation::UniformWriteInFlight(buffer));
        }

        let target = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(GpuError::ResourceNotFound { id: buffer.0 })?;
        if target.location != MemoryLocation::HostVisible {
            return Err(GpuError::invalid("write to device-local buffer"));
        }

        let start = usize::try_from(offset).map_err(|_| GpuError::invalid("offset out of range"))?;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(GpuError::invalid("write past end of buffer"));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer_blocking(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.check_device()?;
        if let Some(error) = state.copy_failure.take() {
            return Err(error);
        }

        let len = usize::try_from(size).map_err(|_| GpuError::invalid("copy size out of range"))?;
        let bytes = state
            .buffers
            .get(&src.0)
            .ok_or(GpuError::ResourceNotFound { id: src.0 })?
            .data
            .get(..len)
            .ok_or_else(|| GpuError::invalid("copy past end of source"))?
            .to_vec();
        let destination = state
            .buffers
            .get_mut(&dst.0)
            .ok_or(GpuError::ResourceNotFound { id: dst.0 })?;
        destination
            .data
            .get_mut(..len)
            .ok_or_else(|| GpuError::invalid("copy past end of destination"))?
            .copy_from_slice(&bytes);

        state.retire_all();
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> GpuResult<PipelineHandle> {
        let mut state = self.state_mut();
        state.check_device()?;
        if desc.vertex_spirv.is_empty() || desc.fragment_spirv.is_empty() {
            return Err(GpuError::InitializationFailed("empty shader module".into()));
        }
        let id = state.allocate_id();
        state.pipelines.insert(id);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        let mut state = self.state_mut();
        if !state.pipelines.remove(&pipeline.0) {
            state.violation(Violation::UnknownHandle(pipeline.0));
        }
    }

    fn create_uniform_set(&mut self, buffer: BufferHandle, range: u64) -> GpuResult<UniformSetHandle> {
        let mut state = self.state_mut();
        state.check_device()?;
        let size = state
            .buffers
            .get(&buffer.0)
            .ok_or(GpuError::ResourceNotFound { id: buffer.0 })?
            .data
            .len() as u64;
        if range > size {
            return Err(GpuError::invalid("uniform range exceeds buffer"));
        }
        let id = state.allocate_id();
        state.uniform_sets.insert(id, buffer);
        Ok(UniformSetHandle(id))
    }

    fn destroy_uniform_set(&mut self, set: UniformSetHandle) {
        let mut state = self.state_mut();
        if state.uniform_sets.remove(&set.0).is_none() {
            state.violation(Violation::UnknownHandle(set.0));
        }
    }

    fn record_commands(&mut self, frame_slot: usize, commands: &CommandSequence) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.check_device()?;
        if let Some(error) = state.record_failure.take() {
            return Err(error);
        }
        if state
            .pending
            .iter()
            .any(|work| work.frame_slot == frame_slot && work.has_commands)
        {
            state.violation(Violation::RecordWhilePending(frame_slot));
        }
        state.recorded.insert(frame_slot, commands.clone());
        state.events.push(MockEvent::Record { frame_slot });
        Ok(())
    }

    fn submit(&mut self, frame_slot: usize, submission: &Submission) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.check_device()?;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        if let Some(fence) = submission.fence {
            let signaled = state.fences.get(&fence.0).copied().unwrap_or(true);
            if signaled || state.is_pending(fence) {
                state.violation(Violation::FenceInUse(fence));
                return Err(GpuError::invalid("submission fence must be unsignaled and idle"));
            }
        }

        if let Some(wait) = submission.wait {
            state.consume_signal(wait);
        }
        if let Some(signal) = submission.signal {
            match state.semaphores.get_mut(&signal.0) {
                Some(signaled) if !*signaled => *signaled = true,
                _ => state.violation(Violation::SemaphoreAlreadySignaled(signal)),
            }
        }

        let mut buffers = Vec::new();
        if submission.has_commands {
            let sequence = state
                .recorded
                .get(&frame_slot)
                .cloned()
                .ok_or_else(|| GpuError::invalid("submit of an unrecorded frame slot"))?;
            buffers = state.buffers_read_by(&sequence);

            let draws = sequence.draws();
            let uniform_bytes = draws
                .first()
                .and_then(|draw| draw.uniform_set)
                .and_then(|set| state.uniform_sets.get(&set.0).copied())
                .and_then(|buffer| state.buffers.get(&buffer.0))
                .map(|buffer| buffer.data.clone());
            state.frames.push(ExecutedFrame {
                frame_slot,
                image_index: sequence.target_image(),
                draws,
                uniform_bytes,
            });
        }

        state.pending.push_back(PendingWork {
            frame_slot,
            has_commands: submission.has_commands,
            fence: submission.fence,
            buffers,
        });
        state.max_outstanding = state.max_outstanding.max(state.pending.len());
        state.events.push(MockEvent::Submit {
            frame_slot,
            fence: submission.fence,
            has_commands: submission.has_commands,
        });
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        semaphore: SemaphoreHandle,
        _timeout_ns: u64,
    ) -> GpuResult<AcquireOutcome> {
        let mut state = self.state_mut();
        state.check_device()?;

        let outcome = match state.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let image_index = state.next_image;
                let count = u32::try_from(state.image_count.max(1)).unwrap_or(u32::MAX);
                state.next_image = (image_index + 1) % count;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };

        if matches!(outcome, AcquireOutcome::Acquired { .. }) {
            match state.semaphores.get_mut(&semaphore.0) {
                Some(signaled) if !*signaled => *signaled = true,
                _ => state.violation(Violation::SemaphoreAlreadySignaled(semaphore)),
            }
        }

        state.events.push(MockEvent::Acquire { semaphore, outcome });
        Ok(outcome)
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> GpuResult<PresentOutcome> {
        let mut state = self.state_mut();
        state.check_device()?;
        if let Some(error) = state.present_failure.take() {
            return Err(error);
        }
        state.consume_signal(wait);
        state.events.push(MockEvent::Present { image_index });
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        let mut state = self.state_mut();
        state.wait_idle_calls += 1;
        state.check_device()?;
        state.retire_all();
        Ok(())
    }
}
