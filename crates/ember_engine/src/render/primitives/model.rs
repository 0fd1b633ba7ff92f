//! Vertex format and GPU meshes
//!
//! [`MeshData`] is plain CPU data and can be built without a device. A
//! [`Model`] is that data uploaded into device-local vertex and index buffers.

use std::mem::size_of;

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::render::vulkan::{Buffer, VulkanDevice, VulkanError, VulkanResult};

/// Vertex layout shared by every mesh pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    /// Object space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Object space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

unsafe impl Zeroable for Vertex {}
unsafe impl Pod for Vertex {}

impl Vertex {
    /// Create a vertex
    pub fn new(position: [f32; 3], color: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, normal, uv }
    }

    /// One interleaved per-vertex binding
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Locations 0-3: position, color, normal, uv
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let vec3 = size_of::<[f32; 3]>() as u32;
        let attribute = |location: u32, format: vk::Format, offset: u32| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32B32_SFLOAT, vec3),
            attribute(2, vk::Format::R32G32B32_SFLOAT, 2 * vec3),
            attribute(3, vk::Format::R32G32_SFLOAT, 3 * vec3),
        ]
    }
}

/// CPU-side mesh
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices, empty for non-indexed meshes
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit cube centered on the origin with per-face normals and colors
    pub fn cube() -> Self {
        // (normal, tangent u, tangent v, color)
        let faces: [([f32; 3], [f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.9, 0.9, 0.9]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [0.8, 0.8, 0.1]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.9, 0.6, 0.1]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.8, 0.1, 0.1]),
            ([0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.1, 0.8]),
            ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.8, 0.1]),
        ];
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut mesh = MeshData::default();
        for (normal, u, v, color) in faces {
            let base = mesh.vertices.len() as u32;
            for (cu, cv) in corners {
                let position = [
                    0.5 * (normal[0] + cu * u[0] + cv * v[0]),
                    0.5 * (normal[1] + cu * u[1] + cv * v[1]),
                    0.5 * (normal[2] + cu * u[2] + cv * v[2]),
                ];
                let uv = [(cu + 1.0) / 2.0, (cv + 1.0) / 2.0];
                mesh.vertices.push(Vertex::new(position, color, normal, uv));
            }
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Unit quad in the XZ plane facing -Y
    pub fn quad() -> Self {
        let normal = [0.0, -1.0, 0.0];
        let color = [1.0, 1.0, 1.0];
        let vertices = vec![
            Vertex::new([-0.5, 0.0, -0.5], color, normal, [0.0, 0.0]),
            Vertex::new([0.5, 0.0, -0.5], color, normal, [1.0, 0.0]),
            Vertex::new([0.5, 0.0, 0.5], color, normal, [1.0, 1.0]),
            Vertex::new([-0.5, 0.0, 0.5], color, normal, [0.0, 1.0]),
        ];
        Self {
            vertices,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

/// Mesh uploaded to device-local memory
pub struct Model {
    vertex_buffer: Buffer,
    vertex_count: u32,
    index_buffer: Option<Buffer>,
    index_count: u32,
}

impl Model {
    /// Upload vertices and optional indices
    pub fn new(device: &VulkanDevice, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<Self> {
        if vertices.len() < 3 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("A model needs at least 3 vertices, got {}", vertices.len()),
            });
        }

        let vertex_buffer = device.create_device_local_buffer(
            bytemuck::cast_slice(vertices),
            size_of::<Vertex>() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = if indices.is_empty() {
            None
        } else {
            Some(device.create_device_local_buffer(
                bytemuck::cast_slice(indices),
                size_of::<u32>() as vk::DeviceSize,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?)
        };

        log::debug!("Model created: {} vertices, {} indices", vertices.len(), indices.len());

        Ok(Self {
            vertex_buffer,
            vertex_count: vertices.len() as u32,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Upload a [`MeshData`]
    pub fn from_mesh(device: &VulkanDevice, mesh: &MeshData) -> VulkanResult<Self> {
        Self::new(device, &mesh.vertices, &mesh.indices)
    }

    /// Bind vertex and index buffers
    pub fn bind(&self, device: &Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.handle()], &[0]);
            if let Some(index_buffer) = &self.index_buffer {
                device.cmd_bind_index_buffer(command_buffer, index_buffer.handle(), 0, vk::IndexType::UINT32);
            }
        }
    }

    /// Record the draw call
    pub fn draw(&self, device: &Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            if self.index_buffer.is_some() {
                device.cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
            } else {
                device.cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
            }
        }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices, zero when not indexed
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}
