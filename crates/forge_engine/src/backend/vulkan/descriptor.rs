//! Descriptor capability
//!
//! Any GPU-bound resource that can be bound to a shader slot implements
//! [`Descriptor`]: it declares the binding type for a slot and produces the
//! write record pointing a descriptor set at itself. The records are plain
//! values; converting them to `vk::WriteDescriptorSet` happens in the device.

use ash::vk;

/// Binding declaration for one slot of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Slot index
    pub binding: u32,
    /// Kind of resource bound at the slot
    pub descriptor_type: vk::DescriptorType,
    /// Shader stages that can access the slot
    pub stage_flags: vk::ShaderStageFlags,
    /// Array length of the slot
    pub count: u32,
}

impl DescriptorBinding {
    /// Single-element binding
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            stage_flags,
            count: 1,
        }
    }

    /// Convert to the Vulkan layout binding
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stage_flags)
            .build()
    }
}

/// Buffer region referenced by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBinding {
    /// Native buffer handle
    pub buffer: vk::Buffer,
    /// Offset of the region
    pub offset: vk::DeviceSize,
    /// Length of the region
    pub range: vk::DeviceSize,
}

impl BufferBinding {
    /// Convert to the Vulkan buffer info
    pub fn to_vk(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: self.offset,
            range: self.range,
        }
    }
}

/// Image view and sampler referenced by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBinding {
    /// Sampler handle (null for sampled images without a sampler)
    pub sampler: vk::Sampler,
    /// Image view handle
    pub image_view: vk::ImageView,
    /// Layout the image is in while bound
    pub image_layout: vk::ImageLayout,
}

impl ImageBinding {
    /// Convert to the Vulkan image info
    pub fn to_vk(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image_view,
            image_layout: self.image_layout,
        }
    }
}

/// Resource side of a descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    /// Uniform or storage buffer region
    Buffer(BufferBinding),
    /// Image and/or sampler
    Image(ImageBinding),
}

/// Record binding a resource to a slot of a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    /// Destination set
    pub dst_set: vk::DescriptorSet,
    /// Destination slot
    pub binding: u32,
    /// Kind of resource written
    pub descriptor_type: vk::DescriptorType,
    /// What gets bound
    pub resource: DescriptorResource,
}

/// Capability of resources that can be bound to a shader slot
pub trait Descriptor {
    /// Layout declaration for this resource kind at `binding`
    fn create_descriptor(binding: u32, stage_flags: vk::ShaderStageFlags) -> DescriptorBinding
    where
        Self: Sized;

    /// Write record pointing `binding` of `set` at this resource
    fn write_descriptor(&self, binding: u32, set: vk::DescriptorSet) -> DescriptorWrite;
}

/// Non-owning image view plus sampler, bindable as a combined image sampler
///
/// Image creation and upload live with the texture loader; this only carries
/// the handles needed to wire an existing image into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledImage {
    image: ImageBinding,
}

impl SampledImage {
    /// Wrap an image view and sampler in shader-read-only layout
    pub fn new(image_view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self::with_layout(image_view, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// Wrap an image view and sampler in an explicit layout
    pub fn with_layout(image_view: vk::ImageView, sampler: vk::Sampler, image_layout: vk::ImageLayout) -> Self {
        Self {
            image: ImageBinding {
                sampler,
                image_view,
                image_layout,
            },
        }
    }

    /// Image info handed to descriptor writes
    pub fn image_info(&self) -> ImageBinding {
        self.image
    }
}

impl Descriptor for SampledImage {
    fn create_descriptor(binding: u32, stage_flags: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    fn write_descriptor(&self, binding: u32, set: vk::DescriptorSet) -> DescriptorWrite {
        DescriptorWrite {
            dst_set: set,
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            resource: DescriptorResource::Image(self.image),
        }
    }
}
