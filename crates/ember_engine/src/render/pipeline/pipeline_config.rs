//! Pipeline configuration
//!
//! Fixed-function state for a graphics pipeline. Viewport and scissor are
//! always dynamic, so nothing here depends on the swap chain extent.

use ash::vk;

use crate::render::primitives::Vertex;

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// Render both faces
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

impl CullMode {
    /// Vulkan flags for this mode
    pub fn flags(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Configuration for a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Fill, line or point rasterization
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding order of front faces
    pub front_face: vk::FrontFace,
    /// Enable depth testing
    pub depth_test: bool,
    /// Enable depth writes
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare_op: vk::CompareOp,
    /// Blend with `SRC_ALPHA / ONE_MINUS_SRC_ALPHA`
    pub alpha_blending: bool,
    /// Vertex buffer bindings
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    /// Subpass of the render pass
    pub subpass: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: CullMode::None.flags(),
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            alpha_blending: false,
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            subpass: 0,
        }
    }
}

impl PipelineConfig {
    /// Blend fragments over what is already in the color attachment
    pub fn enable_alpha_blending(mut self) -> Self {
        self.alpha_blending = true;
        self
    }

    /// No vertex buffers, geometry comes from `gl_VertexIndex`
    pub fn without_vertex_input(mut self) -> Self {
        self.binding_descriptions.clear();
        self.attribute_descriptions.clear();
        self
    }

    /// Set the culling mode
    pub fn with_cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode.flags();
        self
    }
}
