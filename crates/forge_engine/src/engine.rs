//! Core engine implementation

use std::cell::{Ref, RefMut};
use std::time::Duration;

use thiserror::Error;

use crate::backend::VulkanError;
use crate::config::{check_rate, Config, ConfigError, EngineConfig};
use crate::foundation::time::{rate_to_interval, ChangePerSecond, Clock, Delta, IntervalTimer, SystemClock};
use crate::game::Game;
use crate::module::context::{Command, EngineControl};
use crate::module::{EngineTiming, Module, ModuleContext, ModuleRegistry, Stage};

/// Status returned by [`Engine::run`] when the loop ended normally
pub const EXIT_SUCCESS: i32 = 0;

/// Status returned by [`Engine::run`] after an error
pub const EXIT_FAILURE: i32 = 1;

/// Lifecycle of an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, loop not started yet
    Constructed,
    /// Inside [`Engine::run`]
    Running,
    /// Loop finished and everything torn down
    Stopped,
}

/// Main engine struct
///
/// Owns the module registry, the game and the loop timing. Each loop
/// iteration dispatches the `Always` stage, then runs an update tick and a
/// render tick when their intervals have elapsed.
pub struct Engine {
    config: EngineConfig,
    modules: ModuleRegistry,
    game: Option<Box<dyn Game>>,
    clock: Box<dyn Clock>,
    state: EngineState,
    control: EngineControl,
    timing: EngineTiming,
    time_offset: Duration,
    update_timer: IntervalTimer,
    render_timer: IntervalTimer,
    update_delta: Delta,
    render_delta: Delta,
    ups: ChangePerSecond,
    fps: ChangePerSecond,
    stats_second: u64,
}

impl Engine {
    /// Create an engine driven by the wall clock
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_clock(config, SystemClock::new())
    }

    /// Create an engine driven by `clock`
    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> EngineResult<Self> {
        config.validate()?;
        log::info!("Initializing engine...");

        let now = clock.now();
        let update_timer = IntervalTimer::from_rate(config.updates_per_second, now);
        let render_timer = IntervalTimer::from_rate(config.fps_limit.unwrap_or(0.0), now);

        Ok(Self {
            config,
            modules: ModuleRegistry::new(),
            game: None,
            clock: Box::new(clock),
            state: EngineState::Constructed,
            control: EngineControl::default(),
            timing: EngineTiming::default(),
            time_offset: Duration::ZERO,
            update_timer,
            render_timer,
            update_delta: Delta::new(now),
            render_delta: Delta::new(now),
            ups: ChangePerSecond::new(),
            fps: ChangePerSecond::new(),
            stats_second: 0,
        })
    }

    /// Run the main loop until a close is requested or something fails
    ///
    /// Returns [`EXIT_SUCCESS`] or [`EXIT_FAILURE`]. Modules and the game are
    /// torn down before returning, whatever the outcome. An engine runs
    /// at most once.
    pub fn run(&mut self) -> i32 {
        if let Err(e) = self.start() {
            log::warn!("Refusing to run engine: {}", e);
            return EXIT_FAILURE;
        }

        log::info!("Starting main loop...");
        let result = self.main_loop();
        if let Err(e) = &result {
            log::error!("Engine loop aborted: {}", e);
        }
        let failed = result.is_err() || self.control.error;

        self.shutdown();
        if failed {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }

    /// Stop the loop after the current iteration
    ///
    /// Requested before [`run`](Self::run), the loop body never executes.
    pub fn request_close(&mut self, error: bool) {
        log::info!("Engine shutdown requested");
        self.control.request_close(error);
    }

    /// Register `module` in `stage`
    pub fn add_module<T: Module>(&mut self, stage: Stage, module: T) -> EngineResult<()> {
        self.modules.add(stage, module)
    }

    /// Remove the `T` module; returns whether one was registered
    pub fn remove_module<T: Module>(&mut self) -> bool {
        self.modules.remove::<T>()
    }

    /// Whether a `T` module is registered
    pub fn has_module<T: Module>(&self) -> bool {
        self.modules.has::<T>()
    }

    /// Borrow the `T` module
    pub fn module<T: Module>(&self) -> Option<Ref<'_, T>> {
        self.modules.get::<T>()
    }

    /// Mutably borrow the `T` module
    pub fn module_mut<T: Module>(&self) -> Option<RefMut<'_, T>> {
        self.modules.get_mut::<T>()
    }

    /// Registered modules
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Install the game, dropping the previous one
    pub fn set_game<G: Game + 'static>(&mut self, game: G) {
        if self.game.replace(Box::new(game)).is_some() {
            log::debug!("Replaced running game");
        }
    }

    /// The installed game
    pub fn game(&self) -> Option<&dyn Game> {
        self.game.as_deref()
    }

    /// Current settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clock time plus the time offset
    pub fn time(&self) -> Duration {
        self.clock.now() + self.time_offset
    }

    /// Offset added to the clock
    pub fn time_offset(&self) -> Duration {
        self.time_offset
    }

    /// Shift engine time by `offset`
    pub fn set_time_offset(&mut self, offset: Duration) {
        self.time_offset = offset;
    }

    /// Render rate cap
    pub fn fps_limit(&self) -> Option<f32> {
        self.config.fps_limit
    }

    /// Cap the render rate; `None` renders every iteration
    pub fn set_fps_limit(&mut self, limit: Option<f32>) -> EngineResult<()> {
        if let Some(value) = limit {
            check_rate("fps_limit", value)?;
        }
        self.config.fps_limit = limit;
        self.render_timer.set_interval(rate_to_interval(limit.unwrap_or(0.0)));
        Ok(())
    }

    /// Update rate in ticks per second
    pub fn ups_limit(&self) -> f32 {
        self.config.updates_per_second
    }

    /// Change the update rate
    pub fn set_ups_limit(&mut self, rate: f32) -> EngineResult<()> {
        check_rate("updates_per_second", rate)?;
        self.config.updates_per_second = rate;
        self.update_timer.set_interval(rate_to_interval(rate));
        Ok(())
    }

    /// Whether the loop keeps going after the current iteration
    pub fn is_running(&self) -> bool {
        self.control.running
    }

    /// Lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Timing snapshot of the latest iteration
    pub fn timing(&self) -> EngineTiming {
        self.timing
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

    fn start(&mut self) -> EngineResult<()> {
        if self.state != EngineState::Constructed {
            return Err(EngineError::InvalidState {
                expected: EngineState::Constructed,
                found: self.state,
            });
        }

        self.state = EngineState::Running;
        let now = self.time();
        self.update_timer.reset(now);
        self.render_timer.reset(now);
        self.update_delta = Delta::new(now);
        self.render_delta = Delta::new(now);
        self.stats_second = now.as_secs();
        Ok(())
    }

    fn main_loop(&mut self) -> EngineResult<()> {
        while self.control.running {
            self.iterate()?;
        }
        Ok(())
    }

    fn iterate(&mut self) -> EngineResult<()> {
        let now = self.time();
        self.timing.time = now;

        self.dispatch(Stage::Always)?;

        let update_due = self.update_timer.is_passed(now);
        if update_due {
            self.update_timer.reset(now);
            self.update_delta.update(now);
            self.timing.delta = self.update_delta.change();
            self.timing.update_ticks += 1;

            self.dispatch(Stage::PreUpdate)?;
            self.dispatch(Stage::UpdateNormal)?;
            self.update_game()?;

            self.ups.update(now.as_secs_f64());
            self.timing.ups = self.ups.value();
        }

        let render_due = self.config.fps_limit.is_none() || self.render_timer.is_passed(now);
        if render_due {
            self.render_timer.reset(now);
            self.render_delta.update(now);
            self.timing.delta_render = self.render_delta.change();
            self.timing.render_ticks += 1;

            self.dispatch(Stage::UpdateRender)?;
            self.dispatch(Stage::Render)?;

            self.fps.update(now.as_secs_f64());
            self.timing.fps = self.fps.value();
        }

        self.log_stats(now);

        if !update_due && !render_due && self.config.idle_sleep && self.control.running {
            self.idle();
        }
        Ok(())
    }

    fn dispatch(&mut self, stage: Stage) -> EngineResult<()> {
        let modules = &self.modules;
        let timing = &self.timing;
        let control = &mut self.control;

        let result = modules.for_each(stage, |name, module| {
            let mut ctx = ModuleContext::new(modules, timing, &mut *control);
            module.update(&mut ctx).map_err(|source| EngineError::ModuleFailed {
                module: name,
                source: Box::new(source),
            })
        });

        self.apply_commands();
        result
    }

    fn update_game(&mut self) -> EngineResult<()> {
        let Some(game) = self.game.as_mut() else {
            return Ok(());
        };

        let mut ctx = ModuleContext::new(&self.modules, &self.timing, &mut self.control);
        let result = game.update(&mut ctx);

        self.apply_commands();
        result
    }

    fn apply_commands(&mut self) {
        for command in std::mem::take(&mut self.control.commands) {
            match command {
                Command::Add {
                    stage,
                    type_id,
                    name,
                    module,
                } => {
                    if let Err(e) = self.modules.add_boxed(stage, type_id, name, module) {
                        log::warn!("Dropped deferred registration: {}", e);
                    }
                }
                Command::Remove { type_id, name } => {
                    if !self.modules.remove_by_id(type_id) {
                        log::debug!("Deferred removal of {} ignored, not registered", name);
                    }
                }
            }
        }
    }

    fn idle(&self) {
        let mut deadline = self.update_timer.deadline();
        if self.config.fps_limit.is_some() {
            deadline = deadline.min(self.render_timer.deadline());
        }
        self.clock.sleep_until(deadline.saturating_sub(self.time_offset));
    }

    fn log_stats(&mut self, now: Duration) {
        let second = now.as_secs();
        if second > self.stats_second {
            self.stats_second = second;
            log::debug!("{} ups, {} fps", self.timing.ups, self.timing.fps);
        }
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down engine...");
        self.control.running = false;
        self.control.commands.clear();

        self.modules.clear();
        if self.game.take().is_some() {
            log::debug!("Game destroyed");
        }
        self.persist_settings();

        self.state = EngineState::Stopped;
        log::info!("Engine shutdown complete");
    }

    fn persist_settings(&self) {
        let Some(path) = &self.config.persist_path else {
            return;
        };
        match self.config.save_to_file(path) {
            Ok(()) => log::info!("Saved engine settings to {}", path.display()),
            Err(e) => log::warn!("Failed to save engine settings to {}: {}", path.display(), e),
        }
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// A module of this type is already registered
    #[error("Module already registered: {0}")]
    DuplicateModule(&'static str),

    /// The module is borrowed elsewhere and cannot be dispatched
    #[error("Module is busy: {0}")]
    ModuleBusy(&'static str),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid engine state: expected {expected:?}, found {found:?}")]
    InvalidState {
        /// Required state
        expected: EngineState,
        /// Actual state
        found: EngineState,
    },

    /// A module update failed
    #[error("Module {module} failed: {source}")]
    ModuleFailed {
        /// Type name of the failing module
        module: &'static str,
        /// What went wrong
        source: Box<EngineError>,
    },

    /// GPU layer error
    #[error("GPU error: {0}")]
    Gpu(#[from] VulkanError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Game logic error
    #[error("Game error: {0}")]
    Game(String),
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;
