//! Pipeline manager
//!
//! Pipelines are compiled against a render pass, so they have to be rebuilt
//! whenever the swap chain (and with it the render pass) is replaced. The
//! manager keeps the description of every registered pipeline for that
//! purpose and hands out stable [`PipelineId`]s that survive rebuilds.

use std::rc::Rc;

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::render::api::{PipelineDescriptor, RenderDevice};
use crate::render::vulkan::{VulkanError, VulkanResult};

new_key_type! {
    /// Handle of a registered pipeline
    pub struct PipelineId;
}

struct ManagedPipeline {
    descriptor: PipelineDescriptor,
    handle: vk::Pipeline,
}

/// Owns every graphics pipeline bound to the current render pass
pub struct PipelineManager<D: RenderDevice> {
    device: Rc<D>,
    pipelines: SlotMap<PipelineId, ManagedPipeline>,
    render_pass: vk::RenderPass,
}

impl<D: RenderDevice> PipelineManager<D> {
    /// Create an empty manager for `render_pass`
    pub fn new(device: Rc<D>, render_pass: vk::RenderPass) -> Self {
        Self {
            device,
            pipelines: SlotMap::with_key(),
            render_pass,
        }
    }

    /// Compile a pipeline and keep its description for later rebuilds
    pub fn register(&mut self, descriptor: PipelineDescriptor) -> VulkanResult<PipelineId> {
        let handle = self.device.create_graphics_pipeline(&descriptor, self.render_pass)?;
        log::debug!(
            "Registered pipeline {} / {}",
            descriptor.vertex_shader.display(),
            descriptor.fragment_shader.display()
        );
        Ok(self.pipelines.insert(ManagedPipeline { descriptor, handle }))
    }

    /// Current handle of a pipeline
    pub fn get(&self, id: PipelineId) -> Option<vk::Pipeline> {
        self.pipelines.get(id).map(|p| p.handle)
    }

    /// Current handle of a pipeline that must still be registered
    pub fn require(&self, id: PipelineId) -> VulkanResult<vk::Pipeline> {
        self.get(id).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Pipeline {:?} is not registered", id),
        })
    }

    /// Layout a pipeline was created with
    pub fn layout(&self, id: PipelineId) -> Option<vk::PipelineLayout> {
        self.pipelines.get(id).map(|p| p.descriptor.layout)
    }

    /// Destroy a pipeline
    pub fn remove(&mut self, id: PipelineId) -> bool {
        match self.pipelines.remove(id) {
            Some(pipeline) => {
                self.device.destroy_pipeline(pipeline.handle);
                true
            }
            None => false,
        }
    }

    /// Recompile every pipeline against `render_pass`
    ///
    /// A pipeline is only replaced once its successor exists, so a failure
    /// leaves the remaining pipelines usable.
    pub fn rebuild_all(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        self.render_pass = render_pass;
        for pipeline in self.pipelines.values_mut() {
            let handle = self.device.create_graphics_pipeline(&pipeline.descriptor, render_pass)?;
            let old = std::mem::replace(&mut pipeline.handle, handle);
            self.device.destroy_pipeline(old);
        }
        log::debug!("Rebuilt {} pipeline(s)", self.pipelines.len());
        Ok(())
    }

    /// Render pass the pipelines are currently compatible with
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of registered pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline is registered
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl<D: RenderDevice> Drop for PipelineManager<D> {
    fn drop(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            self.device.destroy_pipeline(pipeline.handle);
        }
    }
}

/// Pipeline layout with RAII cleanup
pub struct PipelineLayout<D: RenderDevice> {
    device: Rc<D>,
    layout: vk::PipelineLayout,
}

impl<D: RenderDevice> PipelineLayout<D> {
    /// Create a layout from descriptor set layouts and push constant ranges
    pub fn new(
        device: Rc<D>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let layout = device.create_pipeline_layout(set_layouts, push_constant_ranges)?;
        Ok(Self { device, layout })
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl<D: RenderDevice> Drop for PipelineLayout<D> {
    fn drop(&mut self) {
        self.device.destroy_pipeline_layout(self.layout);
    }
}
