//! Frame loop
//!
//! [`Renderer`] owns every per-frame resource and drives one
//! acquire → record → submit → present cycle per call to
//! [`Renderer::render_frame`]. Transient failures drop the tick and are
//! reported as [`FrameStatus::Dropped`]; only errors that are not
//! [transient](GpuError::is_transient) escape as `Err`.

use bytemuck::Pod;

use crate::core::config::{RendererConfig, MAX_FRAMES_IN_FLIGHT_LIMIT};
use crate::foundation::math::{Mat4, ViewProjection};
use crate::render::api::{
    BufferUsage, GpuBackend, GpuError, GpuResult, PipelineHandle, PresentOutcome, Submission,
};
use crate::render::frame::command_recorder::{CommandRecorder, FrameTarget};
use crate::render::frame::image_chain::{ImageAcquire, ImageChain, StaleReason};
use crate::render::frame::sync::{FrameSyncSet, SlotWait, StaleSignals};
use crate::render::frame::uniforms::FrameUniforms;
use crate::render::frame::upload::{upload_slice, GpuBuffer};
use crate::render::scene::{ObjectId, ObjectRecord, ObjectTable};
use crate::render::RenderError;

/// Why a tick did not reach the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The frame slot's previous submission did not retire in time
    FenceTimeout,
    /// The image chain had no usable image
    ImageUnavailable(StaleReason),
    /// Another frame slot's submission still used the acquired image
    ImageBusy,
    /// The rendered image could not be presented
    PresentationStale,
    /// A recoverable backend failure
    Backend(GpuError),
}

/// Outcome of one [`Renderer::render_frame`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation
    Rendered {
        /// Image-chain slot drawn
        image_index: u32,
        /// Frame slot used
        frame_slot: usize,
    },
    /// The tick was skipped
    Dropped(DropReason),
}

impl FrameStatus {
    /// Whether the frame reached presentation
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }
}

/// Counters kept by the frame loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Ticks that were presented
    pub frames_rendered: u64,
    /// Ticks that were dropped
    pub frames_dropped: u64,
    /// Ticks that blocked on in-flight GPU work
    pub blocking_waits: u64,
}

/// The frame pipeline over a device backend
pub struct Renderer<B: GpuBackend> {
    backend: B,
    image_chain: ImageChain,
    sync: FrameSyncSet,
    recorder: CommandRecorder,
    uniforms: FrameUniforms,
    objects: ObjectTable,
    pipeline: PipelineHandle,
    view_projection: ViewProjection,
    clear_color: [f32; 4],
    acquire_timeout_ns: u64,
    fence_timeout_ns: u64,
    stats: FrameStats,
}

impl<B: GpuBackend> Renderer<B> {
    /// Build the per-frame resources around a backend
    ///
    /// Takes ownership of `pipeline`. Frames in flight are clamped to the
    /// image count and to [`MAX_FRAMES_IN_FLIGHT_LIMIT`]. Any failure here is
    /// fatal and everything created so far is released.
    pub fn new(mut backend: B, config: &RendererConfig, pipeline: PipelineHandle) -> Result<Self, RenderError> {
        let image_chain = match ImageChain::new(&backend) {
            Ok(chain) => chain,
            Err(error) => {
                backend.destroy_pipeline(pipeline);
                return Err(RenderError::InitializationFailed(error.to_string()));
            }
        };
        let image_count = image_chain.image_count();
        let frames_in_flight = config
            .max_frames_in_flight
            .clamp(1, image_count.min(MAX_FRAMES_IN_FLIGHT_LIMIT));
        if frames_in_flight != config.max_frames_in_flight {
            log::warn!(
                "Clamped frames in flight from {} to {frames_in_flight} for {image_count} images",
                config.max_frames_in_flight
            );
        }

        let sync = match FrameSyncSet::new(&mut backend, frames_in_flight, image_count) {
            Ok(sync) => sync,
            Err(error) => {
                backend.destroy_pipeline(pipeline);
                return Err(RenderError::InitializationFailed(error.to_string()));
            }
        };
        let uniforms = match FrameUniforms::new(&mut backend, image_count) {
            Ok(uniforms) => uniforms,
            Err(error) => {
                let mut sync = sync;
                sync.destroy(&mut backend);
                backend.destroy_pipeline(pipeline);
                return Err(RenderError::InitializationFailed(error.to_string()));
            }
        };

        let (width, height) = image_chain.extent();
        log::info!(
            "Renderer ready: {image_count} images, {frames_in_flight} frames in flight, {width}x{height}"
        );

        Ok(Self {
            backend,
            recorder: CommandRecorder::new(image_count),
            image_chain,
            sync,
            uniforms,
            objects: ObjectTable::new(),
            pipeline,
            view_projection: ViewProjection::for_extent(width, height),
            clear_color: config.clear_color,
            acquire_timeout_ns: config.acquire_timeout_ns,
            fence_timeout_ns: config.fence_timeout_ns,
            stats: FrameStats::default(),
        })
    }

    /// Upload a mesh and add it to the end of the scene
    pub fn load_mesh<V: Pod>(&mut self, vertices: &[V], indices: &[u32]) -> Result<ObjectId, RenderError> {
        self.load_mesh_with_material(vertices, indices, None)
    }

    /// Upload a mesh tagged with a material identifier
    ///
    /// Either both streams are uploaded and a record is added, or nothing
    /// is left behind.
    pub fn load_mesh_with_material<V: Pod>(
        &mut self,
        vertices: &[V],
        indices: &[u32],
        material: Option<u32>,
    ) -> Result<ObjectId, RenderError> {
        if let Some(&bad) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
            return Err(RenderError::InvalidMesh(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }

        let vertex_buffer = upload_slice(&mut self.backend, vertices, BufferUsage::VERTEX)
            .map_err(|source| RenderError::resource("vertex buffer", source))?;

        let index_buffer = match upload_slice(&mut self.backend, indices, BufferUsage::INDEX) {
            Ok(buffer) => buffer,
            Err(source) => {
                self.backend.destroy_buffer(vertex_buffer.handle);
                return Err(RenderError::resource("index buffer", source));
            }
        };

        let id = self.objects.insert(ObjectRecord::new(vertex_buffer, index_buffer, material));
        log::debug!(
            "Loaded mesh {id:?}: {} vertices, {} indices",
            vertex_buffer.element_count,
            index_buffer.element_count
        );
        Ok(id)
    }

    /// Replace an object's model transform; visible from the next frame
    pub fn update_object_transform(&mut self, id: ObjectId, transform: Mat4) -> Result<(), RenderError> {
        let record = self.objects.get_mut(id).ok_or(RenderError::ObjectNotFound(id))?;
        record.transform = transform;
        Ok(())
    }

    /// Current model transform of an object
    pub fn object_transform(&self, id: ObjectId) -> Option<Mat4> {
        self.objects.get(id).map(|record| record.transform)
    }

    /// Object record, if loaded
    pub fn object(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(id)
    }

    /// Number of loaded objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Remove an object and free its buffers once the device is idle
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<(), RenderError> {
        if self.objects.get(id).is_none() {
            return Err(RenderError::ObjectNotFound(id));
        }
        self.backend.wait_idle()?;

        if let Some(record) = self.objects.remove(id) {
            self.release_buffers(record.vertex_buffer, record.index_buffer);
            log::debug!("Destroyed object {id:?}");
        }
        Ok(())
    }

    /// Replace the view/projection record written each frame
    pub fn set_view_projection(&mut self, view_projection: ViewProjection) {
        self.view_projection = view_projection;
    }

    /// View/projection record written each frame
    pub fn view_projection(&self) -> &ViewProjection {
        &self.view_projection
    }

    /// Run one tick of the frame loop
    ///
    /// The frame slot index advances whatever the outcome.
    pub fn render_frame(&mut self) -> Result<FrameStatus, RenderError> {
        let frame_slot = self.sync.current_index();
        let result = self.run_tick(frame_slot);
        self.sync.advance();

        let status = match result {
            Ok(status) => status,
            Err(error) if !error.is_transient() => {
                log::error!("Fatal backend error during frame on slot {frame_slot}: {error}");
                return Err(error.into());
            }
            Err(error) => FrameStatus::Dropped(DropReason::Backend(error)),
        };

        match &status {
            FrameStatus::Rendered { image_index, .. } => {
                self.stats.frames_rendered += 1;
                log::trace!("Frame slot {frame_slot} presented image {image_index}");
            }
            FrameStatus::Dropped(reason) => {
                self.stats.frames_dropped += 1;
                log::warn!("Dropped frame on slot {frame_slot}: {reason:?}");
            }
        }
        Ok(status)
    }

    fn run_tick(&mut self, frame_slot: usize) -> GpuResult<FrameStatus> {
        if let Some(status) = self.begin_slot()? {
            return Ok(status);
        }

        // An earlier tick on this slot could not hand its acquire signal back
        if self.sync.current().stale.contains(StaleSignals::IMAGE_ACQUIRED) {
            self.submit_release(frame_slot)?;
            if let Some(status) = self.begin_slot()? {
                return Ok(status);
            }
        }

        let image_acquired = self.sync.current().image_acquired;
        let image_index = match self
            .image_chain
            .acquire(&mut self.backend, image_acquired, self.acquire_timeout_ns)?
        {
            ImageAcquire::Ready(index) => index,
            ImageAcquire::Stale(reason) => {
                return Ok(FrameStatus::Dropped(DropReason::ImageUnavailable(reason)));
            }
        };

        match self.draw_acquired(frame_slot, image_index) {
            Ok(None) => {}
            Ok(Some(reason)) => {
                self.release_acquired_image(frame_slot)?;
                return Ok(FrameStatus::Dropped(reason));
            }
            Err(error) if !error.is_transient() => return Err(error),
            Err(error) => {
                self.release_acquired_image(frame_slot)?;
                return Ok(FrameStatus::Dropped(DropReason::Backend(error)));
            }
        }

        let render_complete = self.sync.current().render_complete;
        let outcome = match self.backend.present(image_index, render_complete) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.sync.mark_stale(StaleSignals::RENDER_COMPLETE);
                return Err(error);
            }
        };
        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => log::debug!("Presented image {image_index} to a suboptimal surface"),
            PresentOutcome::OutOfDate => return Ok(FrameStatus::Dropped(DropReason::PresentationStale)),
        }

        Ok(FrameStatus::Rendered {
            image_index,
            frame_slot,
        })
    }

    /// Wait for the active slot; `Some` carries the status of a dropped tick
    fn begin_slot(&mut self) -> GpuResult<Option<FrameStatus>> {
        match self.sync.begin_frame(&mut self.backend, self.fence_timeout_ns)? {
            SlotWait::TimedOut => Ok(Some(FrameStatus::Dropped(DropReason::FenceTimeout))),
            SlotWait::Ready { blocked } => {
                if blocked {
                    self.stats.blocking_waits += 1;
                }
                Ok(None)
            }
        }
    }

    /// Record, write uniforms and submit for an acquired image
    ///
    /// Returns a drop reason, or an error, if nothing was submitted.
    fn draw_acquired(&mut self, frame_slot: usize, image_index: u32) -> GpuResult<Option<DropReason>> {
        if self
            .sync
            .claim_image(&mut self.backend, image_index, self.fence_timeout_ns)?
            == SlotWait::TimedOut
        {
            return Ok(Some(DropReason::ImageBusy));
        }

        let uniform_set = self
            .uniforms
            .set(image_index)
            .ok_or_else(|| GpuError::invalid(format!("no uniform set for image {image_index}")))?;
        let target = FrameTarget {
            image_index,
            pipeline: self.pipeline,
            uniform_set,
            clear_color: self.clear_color,
        };
        let sequence = self.recorder.record(&target, &self.objects);
        self.backend.record_commands(frame_slot, sequence)?;

        self.uniforms
            .write(&mut self.backend, image_index, &self.view_projection)?;

        let slot = *self.sync.current();
        self.backend.submit(
            frame_slot,
            &Submission {
                wait: Some(slot.image_acquired),
                signal: Some(slot.render_complete),
                fence: Some(slot.in_flight),
                has_commands: true,
            },
        )?;
        self.sync.mark_submitted(image_index);
        Ok(None)
    }

    /// Consume the image-acquired signal of a tick that will not submit
    ///
    /// The command-less submission also signals the slot fence, so the next
    /// use of the slot has something to wait on. If it fails the slot is
    /// flagged and the next tick on it retries before acquiring.
    fn release_acquired_image(&mut self, frame_slot: usize) -> GpuResult<()> {
        match self.submit_release(frame_slot) {
            Err(error) if error.is_transient() => {
                log::error!("Could not release acquired image on slot {frame_slot}: {error}");
                Ok(())
            }
            result => result,
        }
    }

    fn submit_release(&mut self, frame_slot: usize) -> GpuResult<()> {
        let slot = *self.sync.current();
        let release = Submission {
            wait: Some(slot.image_acquired),
            signal: None,
            fence: Some(slot.in_flight),
            has_commands: false,
        };

        if let Err(error) = self.backend.submit(frame_slot, &release) {
            self.sync.mark_stale(StaleSignals::IMAGE_ACQUIRED);
            return Err(error);
        }
        self.sync.mark_released();
        Ok(())
    }

    /// Frame counters
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of frames in flight after clamping
    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    /// Number of image-chain slots
    pub fn image_count(&self) -> usize {
        self.image_chain.image_count()
    }

    /// Block until the device is idle
    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.backend.wait_idle()?;
        Ok(())
    }

    /// The device backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn release_buffers(&mut self, vertex_buffer: GpuBuffer, index_buffer: GpuBuffer) {
        self.backend.destroy_buffer(index_buffer.handle);
        self.backend.destroy_buffer(vertex_buffer.handle);
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(error) = self.backend.wait_idle() {
            log::error!("wait_idle failed during renderer teardown: {error}");
        }

        for record in self.objects.drain() {
            self.release_buffers(record.vertex_buffer, record.index_buffer);
        }
        self.uniforms.destroy(&mut self.backend);
        self.sync.destroy(&mut self.backend);
        self.backend.destroy_pipeline(self.pipeline);

        log::debug!("Renderer resources released");
    }
}
