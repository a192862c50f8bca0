//! Storage buffers for larger shader-readable and writable data

use std::sync::Arc;

use ash::vk;

use super::buffer::{Buffer, MappedMemory};
use super::context::GpuContext;
use super::descriptor::{BufferBinding, Descriptor, DescriptorBinding, DescriptorResource, DescriptorWrite};
use super::VulkanResult;

/// Host-visible buffer bound as a shader storage buffer
#[derive(Debug)]
pub struct StorageBuffer {
    buffer: Buffer,
}

impl StorageBuffer {
    /// Create a storage buffer of `size` bytes, optionally filled with `data`
    pub fn new(context: &Arc<GpuContext>, size: vk::DeviceSize, data: Option<&[u8]>) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            context,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data,
        )?;
        Ok(Self { buffer })
    }

    /// Write `data` at `offset`
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.buffer.write(offset, data)
    }

    /// Map the underlying buffer
    pub fn map_memory(&mut self) -> VulkanResult<MappedMemory<'_>> {
        self.buffer.map_memory()
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

impl Descriptor for StorageBuffer {
    fn create_descriptor(binding: u32, stage_flags: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding::new(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    fn write_descriptor(&self, binding: u32, set: vk::DescriptorSet) -> DescriptorWrite {
        DescriptorWrite {
            dst_set: set,
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            resource: DescriptorResource::Buffer(BufferBinding {
                buffer: self.buffer.handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::HeadlessDevice;
    use ash::vk::Handle;

    #[test]
    fn test_storage_buffer_descriptor_covers_whole_buffer() {
        let context = GpuContext::new(Arc::new(HeadlessDevice::new()));
        let storage = StorageBuffer::new(&context, 1024, None).unwrap();
        let write = storage.write_descriptor(3, vk::DescriptorSet::from_raw(1));

        assert_eq!(write.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(
            write.resource,
            DescriptorResource::Buffer(BufferBinding {
                buffer: storage.buffer().handle(),
                offset: 0,
                range: vk::WHOLE_SIZE,
            })
        );
    }
}
