//! Per-dispatch view of the engine handed to modules and the game

use std::any::{type_name, TypeId};
use std::cell::{Ref, RefMut};
use std::time::Duration;

use super::{Module, ModuleRegistry, Stage};

/// Timing snapshot of the current loop iteration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineTiming {
    /// Engine time at the start of the iteration, offset included
    pub time: Duration,
    /// Time between the last two update ticks
    pub delta: Duration,
    /// Time between the last two render ticks
    pub delta_render: Duration,
    /// Update ticks counted in the last whole second
    pub ups: u32,
    /// Render ticks counted in the last whole second
    pub fps: u32,
    /// Update ticks since the loop started
    pub update_ticks: u64,
    /// Render ticks since the loop started
    pub render_ticks: u64,
}

pub(crate) enum Command {
    Add {
        stage: Stage,
        type_id: TypeId,
        name: &'static str,
        module: Box<dyn Module>,
    },
    Remove {
        type_id: TypeId,
        name: &'static str,
    },
}

/// Loop control shared between the engine and whoever it dispatches
pub(crate) struct EngineControl {
    pub(crate) running: bool,
    pub(crate) error: bool,
    pub(crate) commands: Vec<Command>,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self {
            running: true,
            error: false,
            commands: Vec::new(),
        }
    }
}

impl EngineControl {
    pub(crate) fn request_close(&mut self, error: bool) {
        self.running = false;
        self.error |= error;
    }
}

/// Access to the engine from inside a module or game update
///
/// Other modules are reached through the registry; the module currently
/// being dispatched is mutably borrowed, so looking itself up yields `None`.
/// Registry changes can only be queued here and are applied after the
/// current stage finishes.
pub struct ModuleContext<'a> {
    modules: &'a ModuleRegistry,
    timing: &'a EngineTiming,
    control: &'a mut EngineControl,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        modules: &'a ModuleRegistry,
        timing: &'a EngineTiming,
        control: &'a mut EngineControl,
    ) -> Self {
        Self {
            modules,
            timing,
            control,
        }
    }

    /// Registered modules
    pub fn modules(&self) -> &ModuleRegistry {
        self.modules
    }

    /// Borrow another module
    pub fn module<T: Module>(&self) -> Option<Ref<'_, T>> {
        self.modules.get::<T>()
    }

    /// Mutably borrow another module
    pub fn module_mut<T: Module>(&self) -> Option<RefMut<'_, T>> {
        self.modules.get_mut::<T>()
    }

    /// Whether a `T` is registered
    pub fn has_module<T: Module>(&self) -> bool {
        self.modules.has::<T>()
    }

    /// Register `module` once the current stage has finished
    ///
    /// If a `T` is registered by then, the request is dropped with a warning.
    pub fn defer_add<T: Module>(&mut self, stage: Stage, module: T) {
        self.control.commands.push(Command::Add {
            stage,
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            module: Box::new(module),
        });
    }

    /// Remove the `T` instance once the current stage has finished
    pub fn defer_remove<T: Module>(&mut self) {
        self.control.commands.push(Command::Remove {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        });
    }

    /// Stop the loop after the current iteration
    ///
    /// With `error` set the run reports failure. Repeated requests keep the
    /// error flag once it has been raised.
    pub fn request_close(&mut self, error: bool) {
        self.control.request_close(error);
    }

    /// Whether the loop will continue after this iteration
    pub fn is_running(&self) -> bool {
        self.control.running
    }

    /// Timing snapshot of this iteration
    pub fn timing(&self) -> &EngineTiming {
        self.timing
    }

    /// Engine time at the start of this iteration
    pub fn time(&self) -> Duration {
        self.timing.time
    }

    /// Time between the last two update ticks
    pub fn delta(&self) -> Duration {
        self.timing.delta
    }

    /// Time between the last two render ticks
    pub fn delta_render(&self) -> Duration {
        self.timing.delta_render
    }

    /// Update ticks in the last whole second
    pub fn ups(&self) -> u32 {
        self.timing.ups
    }

    /// Render ticks in the last whole second
    pub fn fps(&self) -> u32 {
        self.timing.fps
    }
}
