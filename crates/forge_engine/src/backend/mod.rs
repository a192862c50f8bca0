//! # Backend Module
//!
//! Concrete implementations of the interfaces the engine core consumes.
//!
//! ## Organization
//!
//! - **Vulkan**: GPU device contract, buffers, uniform buffers and
//!   descriptor wiring, with a Vulkan (`ash`) device and a headless device

pub mod vulkan;

pub use vulkan::{GpuContext, GraphicsDevice, VulkanError, VulkanResult};
