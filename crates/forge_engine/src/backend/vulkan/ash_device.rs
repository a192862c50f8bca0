//! Vulkan implementation of the device contract
//!
//! Wraps an instance and logical device created by the platform layer. The
//! wrapper owns the descriptor pool it creates but not the device or
//! instance; those are destroyed by whoever created them, after this wrapper
//! and every [`GpuContext`](super::GpuContext) using it are gone.

use std::ffi::CStr;
use std::ptr::NonNull;

use ash::{vk, Device, Instance};

use super::descriptor::{DescriptorBinding, DescriptorResource, DescriptorWrite};
use super::device::{find_memory_type, DeviceLimits, GraphicsDevice, RawBuffer};
use super::{VulkanError, VulkanResult};

/// Descriptors of each type reserved per set in the shared pool
const DESCRIPTORS_PER_SET: u32 = 4;

/// Graphics device backed by a Vulkan logical device
pub struct VulkanDevice {
    device: Device,
    name: String,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
    descriptor_pool: vk::DescriptorPool,
}

impl VulkanDevice {
    /// Wrap an existing device, creating a descriptor pool for `max_sets` sets
    pub fn new(
        instance: &Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        max_sets: u32,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: properties.limits.min_storage_buffer_offset_alignment,
            max_uniform_buffer_range: vk::DeviceSize::from(properties.limits.max_uniform_buffer_range),
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: max_sets * DESCRIPTORS_PER_SET,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: max_sets * DESCRIPTORS_PER_SET,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: max_sets * DESCRIPTORS_PER_SET,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::from)?;

        log::info!("Using Vulkan device '{}'", name);
        Ok(Self {
            device,
            name,
            memory_properties,
            limits,
            descriptor_pool,
        })
    }

    /// The wrapped logical device
    pub fn raw_device(&self) -> &Device {
        &self.device
    }
}

impl GraphicsDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<RawBuffer> {
        if size == 0 {
            return Err(VulkanError::ZeroSizedBuffer);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(VulkanError::from)?;

        let mem_requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index =
            match find_memory_type(mem_requirements.memory_type_bits, properties, &self.memory_properties) {
                Ok(index) => index,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(result) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(match VulkanError::from(result) {
                    VulkanError::OutOfDeviceMemory { .. } => VulkanError::OutOfDeviceMemory {
                        requested: mem_requirements.size,
                    },
                    other => other,
                });
            }
        };

        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::from(result));
        }

        Ok(RawBuffer {
            buffer,
            memory,
            size,
            allocation_size: mem_requirements.size,
            properties: self.memory_properties.memory_types[memory_type_index as usize].property_flags,
        })
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VulkanResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::from)?
        };
        NonNull::new(ptr.cast::<u8>()).ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let raw_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings.iter().map(DescriptorBinding::to_vk).collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&raw_bindings);
        unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::from)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::from)?;
        sets.first()
            .copied()
            .ok_or(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, &[set]) } {
            log::error!("Failed to free descriptor set {:?}: {:?}", set, e);
        }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> VulkanResult<()> {
        // One info slot per write so the raw writes can point into stable storage
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer(buffer) => buffer.to_vk(),
                DescriptorResource::Image(_) => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image(image) => image.to_vk(),
                DescriptorResource::Buffer(_) => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let raw_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.dst_set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.descriptor_type);
                match write.resource {
                    DescriptorResource::Buffer(_) => builder.buffer_info(std::slice::from_ref(&buffer_infos[i])).build(),
                    DescriptorResource::Image(_) => builder.image_info(std::slice::from_ref(&image_infos[i])).build(),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&raw_writes, &[]) };
        Ok(())
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::from)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Device wait failed before destroying descriptor pool: {:?}", e);
            }
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}
