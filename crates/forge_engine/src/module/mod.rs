//! Engine modules and their scheduling stages
//!
//! A module is an independently updatable subsystem (renderer, physics,
//! audio, scenes, UI, ...). Each module is registered under one [`Stage`]
//! and the engine dispatches stages in a fixed order every loop iteration.

pub mod context;
pub mod registry;

use std::any::Any;

use crate::engine::EngineResult;

pub use context::{EngineTiming, ModuleContext};
pub use registry::ModuleRegistry;

/// Scheduling bucket of a module
///
/// Dispatch order within one loop iteration is
/// `Always → PreUpdate → UpdateNormal → UpdateRender → Render`.
/// `Always` runs every iteration, `PreUpdate` and `UpdateNormal` only on
/// update ticks, `UpdateRender` and `Render` only on render ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Every loop iteration, regardless of tick cadence
    Always,
    /// Update tick, before regular updates (input, event pumping)
    PreUpdate,
    /// Update tick (game logic, physics, scenes)
    UpdateNormal,
    /// Render tick, before drawing (uniform uploads, descriptor refresh)
    UpdateRender,
    /// Render tick (command recording and submission)
    Render,
}

impl Stage {
    /// All stages in dispatch order
    pub const ALL: [Stage; 5] = [
        Stage::Always,
        Stage::PreUpdate,
        Stage::UpdateNormal,
        Stage::UpdateRender,
        Stage::Render,
    ];
}

/// Downcasting support for registered modules
pub trait AsAny: Any {
    /// Borrow as `Any`
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as `Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Independently updatable engine subsystem
///
/// Errors returned from [`update`](Self::update) are not contained: they end
/// the engine loop and make [`Engine::run`](crate::Engine::run) fail.
pub trait Module: AsAny {
    /// Called once per dispatch of the module's stage
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()>;
}
