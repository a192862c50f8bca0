//! Vulkan GPU resource layer
//!
//! Buffers, uniform buffers and descriptor wiring on top of a
//! [`GraphicsDevice`]. The device is the only place that talks to the
//! graphics API; everything here consumes it as a factory and command
//! contract.
//!
//! Resource lifetime is explicit: dropping (or releasing) a resource retires
//! its native handles to the owning [`GpuContext`], which destroys them once
//! the frame they were retired in has completed on the GPU.

pub mod ash_device;
pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod descriptor_set;
pub mod device;
pub mod headless;
pub mod storage_buffer;
pub mod uniform_buffer;

use ash::vk;
use thiserror::Error;

pub use ash_device::VulkanDevice;
pub use buffer::{Buffer, MappedMemory};
pub use context::GpuContext;
pub use descriptor::{
    BufferBinding, Descriptor, DescriptorBinding, DescriptorResource, DescriptorWrite,
    ImageBinding, SampledImage,
};
pub use descriptor_set::{DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use device::{DeviceLimits, GraphicsDevice, RawBuffer};
pub use headless::HeadlessDevice;
pub use storage_buffer::StorageBuffer;
pub use uniform_buffer::UniformBuffer;

/// Errors produced by the GPU resource layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// No memory type satisfies the requested property flags
    #[error("No suitable memory type found for {0:?}")]
    NoSuitableMemoryType(vk::MemoryPropertyFlags),

    /// Device memory exhausted
    #[error("Out of device memory: {requested} bytes requested")]
    OutOfDeviceMemory {
        /// Number of bytes that were requested
        requested: vk::DeviceSize,
    },

    /// Buffers must have a non-zero size
    #[error("Cannot create a zero-sized buffer")]
    ZeroSizedBuffer,

    /// Access outside of a resource's bounds
    #[error("Access of {len} bytes at offset {offset} exceeds resource size {size}")]
    OutOfBounds {
        /// Start of the access
        offset: vk::DeviceSize,
        /// Length of the access
        len: vk::DeviceSize,
        /// Size of the resource
        size: vk::DeviceSize,
    },

    /// Mapping requested on memory that is not host visible
    #[error("Memory is not host visible")]
    NotHostVisible,

    /// Host access requested on memory that is not host coherent
    #[error("Memory is host visible but not host coherent")]
    NotHostCoherent,

    /// Memory is already mapped
    #[error("Memory is already mapped")]
    AlreadyMapped,

    /// Handle does not name a live resource of this device
    #[error("Unknown or stale handle: {0:#x}")]
    UnknownHandle(u64),

    /// Descriptor write does not match the layout of its destination set
    #[error("Descriptor mismatch: {reason}")]
    DescriptorMismatch {
        /// Description of what did not match
        reason: String,
    },

    /// Two layout entries share a binding slot
    #[error("Duplicate descriptor binding {0}")]
    DuplicateBinding(u32),

    /// Uniform block larger than the device allows
    #[error("Uniform range {size} exceeds device maximum {max}")]
    UniformRangeExceeded {
        /// Requested size
        size: vk::DeviceSize,
        /// Device limit
        max: vk::DeviceSize,
    },
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfDeviceMemory { requested: 0 }
            }
            other => Self::Api(other),
        }
    }
}

/// Result type for GPU resource operations
pub type VulkanResult<T> = Result<T, VulkanError>;
