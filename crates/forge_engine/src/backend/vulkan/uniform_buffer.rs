//! Uniform buffers for small, frequently updated parameter blocks

use std::sync::Arc;

use ash::vk;

use super::buffer::{Buffer, MappedMemory};
use super::context::GpuContext;
use super::descriptor::{BufferBinding, Descriptor, DescriptorBinding, DescriptorResource, DescriptorWrite};
use super::device::align_up;
use super::{VulkanError, VulkanResult};

/// Host-visible buffer holding one uniform block
///
/// The content size is fixed at construction; [`update`](Self::update)
/// always overwrites the whole block. The backing allocation is rounded up
/// to the device's uniform offset alignment.
///
/// There is no built-in multi-buffering: keep one `UniformBuffer` per frame
/// in flight if the block changes every frame.
#[derive(Debug)]
pub struct UniformBuffer {
    buffer: Buffer,
    size: vk::DeviceSize,
    binding: BufferBinding,
}

impl UniformBuffer {
    /// Memory properties every uniform buffer is created with
    pub const MEMORY_PROPERTIES: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    /// Create a uniform buffer for a block of `size` bytes
    pub fn new(context: &Arc<GpuContext>, size: vk::DeviceSize) -> VulkanResult<Self> {
        let buffer = Self::create_buffer(context, size)?;
        let binding = Self::binding_for(&buffer, size);
        Ok(Self { buffer, size, binding })
    }

    /// Create a uniform buffer sized for `T` and initialise it with `value`
    pub fn from_pod<T: bytemuck::Pod>(context: &Arc<GpuContext>, value: &T) -> VulkanResult<Self> {
        let mut uniform = Self::new(context, std::mem::size_of::<T>() as vk::DeviceSize)?;
        uniform.update_pod(value)?;
        Ok(uniform)
    }

    /// Overwrite the whole block; `data` must be exactly `size` bytes
    pub fn update(&mut self, data: &[u8]) -> VulkanResult<()> {
        if data.len() as vk::DeviceSize != self.size {
            return Err(VulkanError::OutOfBounds {
                offset: 0,
                len: data.len() as vk::DeviceSize,
                size: self.size,
            });
        }
        self.buffer.write(0, data)
    }

    /// Overwrite the whole block with a plain-old-data value
    pub fn update_pod<T: bytemuck::Pod>(&mut self, value: &T) -> VulkanResult<()> {
        self.update(bytemuck::bytes_of(value))
    }

    /// Map the underlying buffer
    pub fn map_memory(&mut self) -> VulkanResult<MappedMemory<'_>> {
        self.buffer.map_memory()
    }

    /// Replace the buffer with a new one of `size` bytes
    ///
    /// The old buffer is retired through the context; descriptor writes
    /// obtained before this call reference the old handle and must be
    /// fetched again.
    pub fn recreate(&mut self, size: vk::DeviceSize) -> VulkanResult<()> {
        let buffer = Self::create_buffer(self.buffer.context(), size)?;
        log::debug!(
            "Recreating uniform buffer {:?} -> {:?} ({} -> {} bytes)",
            self.buffer.handle(),
            buffer.handle(),
            self.size,
            size
        );
        self.binding = Self::binding_for(&buffer, size);
        self.buffer = buffer;
        self.size = size;
        Ok(())
    }

    /// Size of the uniform block
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Cached buffer region used for descriptor writes
    pub fn buffer_info(&self) -> BufferBinding {
        self.binding
    }

    fn create_buffer(context: &Arc<GpuContext>, size: vk::DeviceSize) -> VulkanResult<Buffer> {
        let limits = context.device().limits();
        if size > limits.max_uniform_buffer_range {
            return Err(VulkanError::UniformRangeExceeded {
                size,
                max: limits.max_uniform_buffer_range,
            });
        }
        Buffer::new(
            context,
            align_up(size, limits.min_uniform_buffer_offset_alignment),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::MEMORY_PROPERTIES,
            None,
        )
    }

    fn binding_for(buffer: &Buffer, size: vk::DeviceSize) -> BufferBinding {
        BufferBinding {
            buffer: buffer.handle(),
            offset: 0,
            range: size,
        }
    }
}

impl Descriptor for UniformBuffer {
    fn create_descriptor(binding: u32, stage_flags: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    fn write_descriptor(&self, binding: u32, set: vk::DescriptorSet) -> DescriptorWrite {
        DescriptorWrite {
            dst_set: set,
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resource: DescriptorResource::Buffer(self.binding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::{DeviceLimits, HeadlessDevice};
    use ash::vk::Handle;

    fn setup() -> (Arc<HeadlessDevice>, Arc<GpuContext>) {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone());
        (device, context)
    }

    #[test]
    fn test_allocation_is_aligned() {
        let (_device, context) = setup();
        let uniform = UniformBuffer::new(&context, 100).unwrap();

        assert_eq!(uniform.size(), 100);
        assert_eq!(uniform.buffer().size(), 256);
        assert_eq!(uniform.buffer_info().range, 100);
        assert_eq!(uniform.buffer().usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn test_update_round_trip_across_sizes() {
        let (_device, context) = setup();
        let mut size = 4;
        while size <= 256 {
            let mut uniform = UniformBuffer::new(&context, size).unwrap();
            let data: Vec<u8> = (0..size).map(|i| (i * 7 + size) as u8).collect();

            uniform.update(&data).unwrap();
            let mapped = uniform.map_memory().unwrap();
            assert_eq!(&mapped[..size as usize], data.as_slice());
            drop(mapped);

            size *= 2;
        }
    }

    #[test]
    fn test_update_requires_exact_size() {
        let (_device, context) = setup();
        let mut uniform = UniformBuffer::new(&context, 16).unwrap();

        assert!(matches!(uniform.update(&[0u8; 8]), Err(VulkanError::OutOfBounds { len: 8, size: 16, .. })));
        assert!(matches!(uniform.update(&[0u8; 32]), Err(VulkanError::OutOfBounds { .. })));
        assert!(uniform.update(&[1u8; 16]).is_ok());
    }

    #[test]
    fn test_update_pod() {
        let (_device, context) = setup();
        let mut uniform = UniformBuffer::from_pod(&context, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(uniform.size(), 16);

        uniform.update_pod(&[5.0f32, 6.0, 7.0, 8.0]).unwrap();
        let mapped = uniform.map_memory().unwrap();
        assert_eq!(&mapped[..16], bytemuck::bytes_of(&[5.0f32, 6.0, 7.0, 8.0]));
    }

    #[test]
    fn test_uniform_range_limit() {
        let device = Arc::new(HeadlessDevice::new().with_limits(DeviceLimits {
            max_uniform_buffer_range: 64,
            ..DeviceLimits::default()
        }));
        let context = GpuContext::new(device);

        assert!(UniformBuffer::new(&context, 64).is_ok());
        assert_eq!(
            UniformBuffer::new(&context, 65).unwrap_err(),
            VulkanError::UniformRangeExceeded { size: 65, max: 64 }
        );
    }

    #[test]
    fn test_create_descriptor_is_pure() {
        let binding = UniformBuffer::create_descriptor(1, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(binding.binding, 1);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(binding.count, 1);
        assert_eq!(binding, UniformBuffer::create_descriptor(1, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_write_descriptor_is_stable() {
        let (_device, context) = setup();
        let mut uniform = UniformBuffer::new(&context, 64).unwrap();
        let set = vk::DescriptorSet::from_raw(42);

        let first = uniform.write_descriptor(0, set);
        let second = uniform.write_descriptor(0, set);
        assert_eq!(first, second);

        uniform.update(&[3u8; 64]).unwrap();
        assert_eq!(uniform.write_descriptor(0, set), first);
    }

    #[test]
    fn test_recreate_changes_write_descriptor() {
        let (device, context) = setup();
        let mut uniform = UniformBuffer::new(&context, 64).unwrap();
        let set = vk::DescriptorSet::from_raw(42);
        let before = uniform.write_descriptor(0, set);

        uniform.recreate(128).unwrap();
        let after = uniform.write_descriptor(0, set);

        assert_ne!(before, after);
        assert_eq!(uniform.size(), 128);
        match after.resource {
            DescriptorResource::Buffer(info) => {
                assert_eq!(info.buffer, uniform.handle());
                assert_eq!(info.range, 128);
            }
            DescriptorResource::Image(_) => panic!("expected a buffer write"),
        }

        // Old buffer waits for the frame fence
        assert_eq!(device.live_buffers(), 2);
        context.frame_completed(context.current_frame());
        assert_eq!(device.live_buffers(), 1);
    }
}
