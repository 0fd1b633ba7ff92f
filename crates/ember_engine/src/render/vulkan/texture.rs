//! Sampled 2D textures
//!
//! Images are decoded with the `image` crate, converted to RGBA8 and uploaded
//! through a staging buffer into device-local memory.

use std::path::Path;

use ash::{vk, Device};
use thiserror::Error;

use crate::render::game_object::SampledImage;
use crate::render::vulkan::{ImageView, VulkanDevice, VulkanError, VulkanResult};

/// Texture loading errors
#[derive(Error, Debug)]
pub enum TextureError {
    /// The file could not be read or decoded
    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),

    /// Upload or resource creation failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Device-local image with view and sampler
pub struct Texture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<ImageView>,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
}

impl Texture {
    /// Load and upload an image file
    pub fn from_file(device: &VulkanDevice, path: impl AsRef<Path>) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Loaded texture {} ({}x{})", path.display(), width, height);
        Ok(Self::from_rgba(device, vk::Extent2D { width, height }, rgba.as_raw())?)
    }

    /// 1x1 texture of a single color
    pub fn solid_color(device: &VulkanDevice, color: [u8; 4]) -> VulkanResult<Self> {
        Self::from_rgba(device, vk::Extent2D { width: 1, height: 1 }, &color)
    }

    /// Upload tightly packed RGBA8 pixels
    pub fn from_rgba(device: &VulkanDevice, extent: vk::Extent2D, pixels: &[u8]) -> VulkanResult<Self> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Expected {} bytes of RGBA pixels, got {}", expected, pixels.len()),
            });
        }

        let raw = device.raw().clone();
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            raw.create_image(&image_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut texture = Self {
            device: raw.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: None,
            sampler: vk::Sampler::null(),
            extent,
        };

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory_type_index = device
            .physical()
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        texture.memory = unsafe {
            raw.allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };
        unsafe {
            raw.bind_image_memory(image, texture.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let mut staging = device.create_buffer(
            pixels.len() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.map()?;
        staging.write_to_buffer(pixels, 0);
        staging.unmap();

        device.single_time_commands(|dev, command_buffer| {
            Self::record_upload(dev, command_buffer, staging.handle(), image, extent);
        })?;

        texture.view = Some(ImageView::new(raw.clone(), image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?);

        let anisotropy = device.physical().features.sampler_anisotropy == vk::TRUE;
        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                device.physical().properties.limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        texture.sampler = unsafe {
            raw.create_sampler(&sampler_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(texture)
    }

    fn record_upload(
        device: &Device,
        command_buffer: vk::CommandBuffer,
        staging: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) {
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        let to_shader_read = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer.build()],
            );
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader_read.build()],
            );
        }
    }

    /// Pixel size of the texture
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl SampledImage for Texture {
    fn descriptor_image_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view.as_ref().map_or(vk::ImageView::null(), ImageView::handle),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.view = None;
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}
