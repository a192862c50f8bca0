//! # Forge Engine
//!
//! A module-driven game engine core with a Vulkan GPU resource layer.
//!
//! ## Features
//!
//! - **Staged Modules**: Subsystems registered per stage, at most one per type
//! - **Fixed-Rate Loop**: Update ticks at a fixed rate, optionally capped rendering
//! - **GPU Resources**: Buffers, uniform buffers and descriptor wiring over `ash`
//! - **Headless Device**: The whole GPU layer runs without a GPU for testing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forge_engine::prelude::*;
//!
//! struct Spinner {
//!     angle: f32,
//! }
//!
//! impl Module for Spinner {
//!     fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
//!         self.angle += ctx.delta().as_secs_f32();
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     forge_engine::foundation::logging::init();
//!
//!     let mut engine = Engine::new(EngineConfig::default())?;
//!     engine.add_module(Stage::UpdateNormal, Spinner { angle: 0.0 })?;
//!     std::process::exit(engine.run());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod foundation;
pub mod module;

mod engine;
mod game;

pub use engine::{Engine, EngineError, EngineResult, EngineState, EXIT_FAILURE, EXIT_SUCCESS};
pub use game::Game;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        backend::vulkan::{
            Buffer, Descriptor, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder,
            DescriptorSetWriter, GpuContext, GraphicsDevice, HeadlessDevice, UniformBuffer,
            VulkanError, VulkanResult,
        },
        config::{Config, EngineConfig},
        module::{Module, ModuleContext, ModuleRegistry, Stage},
        Engine, EngineError, EngineResult, EngineState, Game, EXIT_FAILURE, EXIT_SUCCESS,
    };
}
