//! Command recording for the frame pipeline
//!
//! Builds the backend-neutral command sequence drawn into one image-chain
//! slot. The sequence is rebuilt from the object table on every tick; the
//! recorder only keeps the allocation around.

use crate::foundation::math::{to_raw, RawMat4};
use crate::render::api::{BufferHandle, PipelineHandle, UniformSetHandle};
use crate::render::scene::ObjectTable;

/// One recorded command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderCommand {
    /// Begin the render pass targeting an image-chain slot
    BeginRenderPass {
        /// Target image-chain slot
        image_index: u32,
        /// Clear color of the color attachment
        clear_color: [f32; 4],
    },
    /// Bind the graphics pipeline
    BindPipeline(PipelineHandle),
    /// Bind a vertex stream at binding 0
    BindVertexBuffer(BufferHandle),
    /// Bind a 32-bit index stream
    BindIndexBuffer(BufferHandle),
    /// Push the per-object model matrix
    PushTransform(RawMat4),
    /// Bind the per-frame uniform set at set 0
    BindUniformSet(UniformSetHandle),
    /// Indexed draw of the bound streams
    DrawIndexed {
        /// Number of indices to draw
        index_count: u32,
    },
    /// End the render pass
    EndRenderPass,
}

/// Draw call reconstructed from a command sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    /// Bound pipeline
    pub pipeline: Option<PipelineHandle>,
    /// Bound vertex buffer
    pub vertex_buffer: Option<BufferHandle>,
    /// Bound index buffer
    pub index_buffer: Option<BufferHandle>,
    /// Pushed model matrix at the time of the draw
    pub transform: RawMat4,
    /// Bound uniform set
    pub uniform_set: Option<UniformSetHandle>,
    /// Indices drawn
    pub index_count: u32,
}

/// Ordered list of commands for one image-chain slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSequence {
    commands: Vec<RenderCommand>,
}

impl CommandSequence {
    /// Commands in recording order
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Image-chain slot targeted by the render pass
    pub fn target_image(&self) -> Option<u32> {
        self.commands.iter().find_map(|command| match command {
            RenderCommand::BeginRenderPass { image_index, .. } => Some(*image_index),
            _ => None,
        })
    }

    /// Flatten the sequence into the draws it issues
    ///
    /// Bound state carries over between draws the way it does on a real
    /// command buffer.
    pub fn draws(&self) -> Vec<DrawCall> {
        let mut state = DrawCall {
            pipeline: None,
            vertex_buffer: None,
            index_buffer: None,
            transform: [[0.0; 4]; 4],
            uniform_set: None,
            index_count: 0,
        };
        let mut draws = Vec::new();

        for command in &self.commands {
            match *command {
                RenderCommand::BindPipeline(pipeline) => state.pipeline = Some(pipeline),
                RenderCommand::BindVertexBuffer(buffer) => state.vertex_buffer = Some(buffer),
                RenderCommand::BindIndexBuffer(buffer) => state.index_buffer = Some(buffer),
                RenderCommand::PushTransform(transform) => state.transform = transform,
                RenderCommand::BindUniformSet(set) => state.uniform_set = Some(set),
                RenderCommand::DrawIndexed { index_count } => {
                    draws.push(DrawCall { index_count, ..state });
                }
                RenderCommand::BeginRenderPass { .. } | RenderCommand::EndRenderPass => {}
            }
        }

        draws
    }

    fn clear(&mut self) {
        self.commands.clear();
    }

    fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }
}

/// Inputs shared by every object drawn in one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Image-chain slot being drawn
    pub image_index: u32,
    /// Pipeline bound once per sequence
    pub pipeline: PipelineHandle,
    /// Uniform set belonging to the same image-chain slot
    pub uniform_set: UniformSetHandle,
    /// Clear color of the render pass
    pub clear_color: [f32; 4],
}

/// Builds command sequences, one cached sequence per image-chain slot
pub struct CommandRecorder {
    sequences: Vec<CommandSequence>,
}

impl CommandRecorder {
    /// Create a recorder for an image chain of `image_count` slots
    pub fn new(image_count: usize) -> Self {
        Self {
            sequences: vec![CommandSequence::default(); image_count],
        }
    }

    /// Re-record the sequence for `target.image_index` from the object table
    ///
    /// Objects are drawn in scene order with their current transforms.
    pub fn record(&mut self, target: &FrameTarget, objects: &ObjectTable) -> &CommandSequence {
        let slot = target.image_index as usize;
        if slot >= self.sequences.len() {
            self.sequences.resize_with(slot + 1, CommandSequence::default);
        }

        let sequence = &mut self.sequences[slot];
        sequence.clear();

        sequence.push(RenderCommand::BeginRenderPass {
            image_index: target.image_index,
            clear_color: target.clear_color,
        });
        sequence.push(RenderCommand::BindPipeline(target.pipeline));

        for (_, object) in objects.iter() {
            sequence.push(RenderCommand::BindVertexBuffer(object.vertex_buffer.handle));
            sequence.push(RenderCommand::BindIndexBuffer(object.index_buffer.handle));
            sequence.push(RenderCommand::PushTransform(to_raw(&object.transform)));
            sequence.push(RenderCommand::BindUniformSet(target.uniform_set));
            sequence.push(RenderCommand::DrawIndexed {
                index_count: object.index_count,
            });
        }

        sequence.push(RenderCommand::EndRenderPass);

        log::trace!(
            "Recorded {} commands for image {}",
            sequence.commands.len(),
            target.image_index
        );
        sequence
    }
}
