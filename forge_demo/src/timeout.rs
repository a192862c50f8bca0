//! Ends the demo after a fixed run time

use std::time::Duration;

use forge_engine::prelude::*;

/// Requests a clean close once engine time reaches the deadline
pub struct Timeout {
    deadline: Duration,
}

impl Timeout {
    /// Close after `run_time` of engine time
    pub fn new(run_time: Duration) -> Self {
        Self { deadline: run_time }
    }
}

impl Module for Timeout {
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
        if ctx.is_running() && ctx.time() >= self.deadline {
            log::info!(
                "Run time of {:.1}s reached ({} ups, {} fps)",
                self.deadline.as_secs_f32(),
                ctx.ups(),
                ctx.fps()
            );
            ctx.request_close(false);
        }
        Ok(())
    }
}
