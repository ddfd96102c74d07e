//! The frame pipeline
//!
//! Leaf-first: image chain, frame-in-flight synchronization, staged
//! uploads, per-image uniforms, command recording, and the frame loop that
//! drives them once per tick.

pub mod image_chain;
pub mod sync;
pub mod upload;
pub mod uniforms;
pub mod command_recorder;
pub mod frame_loop;

pub use command_recorder::{CommandRecorder, CommandSequence, DrawCall, FrameTarget, RenderCommand};
pub use frame_loop::{DropReason, FrameStats, FrameStatus, Renderer};
pub use image_chain::{ImageAcquire, ImageChain, StaleReason};
pub use sync::{FrameSlot, FrameSlotState, FrameSyncSet, SlotWait, StaleSignals};
pub use uniforms::FrameUniforms;
pub use upload::{upload_buffer, upload_slice, GpuBuffer};
