//! Graphics device contract
//!
//! [`GraphicsDevice`] is the narrow interface between the resource layer and
//! whatever actually owns GPU memory. Buffers and descriptor sets use it as a
//! factory (create/destroy) and a command sink (map, update); they never poll
//! its internal state.

use std::ptr::NonNull;

use ash::vk;

use super::descriptor::{DescriptorBinding, DescriptorWrite};
use super::{VulkanError, VulkanResult};

/// Native handles of a buffer together with its bound memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    /// Native buffer handle
    pub buffer: vk::Buffer,
    /// Device memory bound at offset 0
    pub memory: vk::DeviceMemory,
    /// Size the buffer was created with
    pub size: vk::DeviceSize,
    /// Size of the backing allocation (may exceed `size`)
    pub allocation_size: vk::DeviceSize,
    /// Property flags of the chosen memory type
    pub properties: vk::MemoryPropertyFlags,
}

/// Device limits the resource layer has to respect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment for uniform buffer offsets and sizes
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// Required alignment for storage buffer offsets
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
    /// Largest range a single uniform buffer descriptor may cover
    pub max_uniform_buffer_range: vk::DeviceSize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        // Vulkan-guaranteed minimums
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            max_uniform_buffer_range: 16384,
        }
    }
}

/// Factory and command contract of a graphics device
///
/// Implementations use interior mutability; every method takes `&self` so a
/// device can be shared behind an `Arc` by all resources created from it.
pub trait GraphicsDevice: Send + Sync {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Limits relevant to buffer sizing
    fn limits(&self) -> DeviceLimits;

    /// Memory heaps and types exposed by the device
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Create a buffer and bind freshly allocated memory to it
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<RawBuffer>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: RawBuffer);

    /// Map `size` bytes of `memory` starting at `offset`
    ///
    /// The returned pointer stays valid until [`unmap_memory`](Self::unmap_memory)
    /// is called for the same memory.
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VulkanResult<NonNull<u8>>;

    /// Unmap previously mapped memory
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    /// Create a descriptor set layout from binding declarations
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Allocate one descriptor set with the given layout
    fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;

    /// Return a descriptor set to its pool
    fn free_descriptor_set(&self, set: vk::DescriptorSet);

    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> VulkanResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> VulkanResult<()>;
}

/// Find memory type with required properties
pub fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<u32> {
    let count = (mem_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    mem_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            (type_filter & (1 << i)) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(VulkanError::NoSuitableMemoryType(properties))
}

/// Round `size` up to the next multiple of `alignment`
pub fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = *flags;
        }
        props.memory_type_count = types.len() as u32;
        props
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert_eq!(find_memory_type(u32::MAX, host, &props), Ok(1));
        assert_eq!(find_memory_type(0b100, host, &props), Ok(2));
        assert_eq!(
            find_memory_type(0b001, host, &props),
            Err(VulkanError::NoSuitableMemoryType(host))
        );
    }

    #[test]
    fn test_find_memory_type_ignores_types_past_count() {
        let mut props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[5].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert!(find_memory_type(u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE, &props).is_err());
    }

    #[test]
    fn test_find_memory_type_clamps_reported_count() {
        let mut props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_type_count = 64;

        assert_eq!(
            find_memory_type(u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE, &props),
            Err(VulkanError::NoSuitableMemoryType(vk::MemoryPropertyFlags::HOST_VISIBLE))
        );
        assert_eq!(find_memory_type(u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props), Ok(0));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(100, 1), 100);
    }
}
