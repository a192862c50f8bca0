//! Game hook driven by the engine loop

use crate::engine::EngineResult;
use crate::module::ModuleContext;

/// Top-level game logic
///
/// The engine owns at most one game and calls [`update`](Self::update) once
/// per update tick, after the `UpdateNormal` stage. Anything that needs
/// teardown goes in `Drop`; the game is dropped after every module.
pub trait Game {
    /// Advance the game by one update tick
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()>;
}
