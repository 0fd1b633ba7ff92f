//! GPU buffers
//!
//! A [`Buffer`] holds `instance_count` instances of `instance_size` bytes, each
//! padded to the device's offset alignment so that every instance can be bound
//! to a descriptor on its own.

use ash::{vk, Device};
use crate::render::api::MappedBuffer;
use crate::render::vulkan::{PhysicalDeviceInfo, VulkanResult, VulkanError};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    buffer_size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    memory_flags: vk::MemoryPropertyFlags,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        let alignment_size = Self::alignment(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * vk::DeviceSize::from(instance_count);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(buffer_size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut result = Self {
            device: device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            mapped: std::ptr::null_mut(),
            buffer_size,
            instance_size,
            instance_count,
            alignment_size,
            memory_flags: vk::MemoryPropertyFlags::empty(),
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = physical_device.find_memory_type(requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        result.memory = unsafe {
            device.allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };
        result.memory_flags = physical_device.memory_type_flags(memory_type_index);

        unsafe {
            device.bind_buffer_memory(buffer, result.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(result)
    }

    /// Size of one instance rounded up to a multiple of `min_offset_alignment`
    pub fn alignment(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
        if min_offset_alignment > 0 {
            (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
        } else {
            instance_size
        }
    }

    /// Map the whole buffer into host memory
    pub fn map(&mut self) -> VulkanResult<()> {
        if !self.mapped.is_null() {
            return Ok(());
        }
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        self.mapped = ptr.cast();
        Ok(())
    }

    /// Release the host mapping
    pub fn unmap(&mut self) {
        if !self.mapped.is_null() {
            unsafe {
                self.device.unmap_memory(self.memory);
            }
            self.mapped = std::ptr::null_mut();
        }
    }

    /// Copy `bytes` into the mapped buffer at `offset`
    ///
    /// Panics if the buffer is not mapped or the write does not fit.
    pub fn write_to_buffer(&mut self, bytes: &[u8], offset: vk::DeviceSize) {
        assert!(!self.mapped.is_null(), "Cannot write to unmapped buffer");
        let end = offset + bytes.len() as vk::DeviceSize;
        assert!(end <= self.buffer_size, "Write of {} bytes at {} overflows buffer of {}", bytes.len(), offset, self.buffer_size);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
    }

    /// Copy one instance into slot `index`
    pub fn write_to_index(&mut self, bytes: &[u8], index: u32) {
        self.write_to_buffer(bytes, vk::DeviceSize::from(index) * self.alignment_size);
    }

    fn mapped_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build()
    }

    /// Flush a range of the mapping so the device sees host writes
    pub fn flush_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[self.mapped_range(size, offset)])
                .map_err(VulkanError::Api)
        }
    }

    /// Flush the instance at `index`
    pub fn flush_index(&self, index: u32) -> VulkanResult<()> {
        self.flush_range(self.alignment_size, vk::DeviceSize::from(index) * self.alignment_size)
    }

    /// Invalidate a range so host reads see device writes
    pub fn invalidate(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe {
            self.device
                .invalidate_mapped_memory_ranges(&[self.mapped_range(size, offset)])
                .map_err(VulkanError::Api)
        }
    }

    /// Descriptor info for a range of the buffer
    pub fn descriptor_info_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    /// Descriptor info for the instance at `index`
    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        self.descriptor_info_range(self.alignment_size, vk::DeviceSize::from(index) * self.alignment_size)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Total size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer_size
    }

    /// Number of instances
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Unpadded size of one instance
    pub fn instance_size(&self) -> vk::DeviceSize {
        self.instance_size
    }

    /// Padded size of one instance
    pub fn alignment_size(&self) -> vk::DeviceSize {
        self.alignment_size
    }

    /// Properties of the memory backing this buffer
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }
}

impl MappedBuffer for Buffer {
    fn write_bytes(&mut self, bytes: &[u8], offset: vk::DeviceSize) {
        self.write_to_buffer(bytes, offset);
    }

    fn flush(&self) -> VulkanResult<()> {
        self.flush_range(vk::WHOLE_SIZE, 0)
    }

    fn is_coherent(&self) -> bool {
        self.memory_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.descriptor_info_range(vk::WHOLE_SIZE, 0)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_rounds_up_to_multiple() {
        assert_eq!(Buffer::alignment(100, 64), 128);
        assert_eq!(Buffer::alignment(128, 64), 128);
        assert_eq!(Buffer::alignment(1, 256), 256);
    }

    #[test]
    fn test_alignment_without_requirement_keeps_size() {
        assert_eq!(Buffer::alignment(100, 0), 100);
        assert_eq!(Buffer::alignment(100, 1), 100);
    }
}
