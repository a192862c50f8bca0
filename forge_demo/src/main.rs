//! Forge engine demo
//!
//! Runs the engine on a headless device for a few seconds: an orbiting
//! camera advanced on every update tick and uploaded into per-frame uniform
//! buffers on every render tick.
//!
//! Usage: `forge_demo [config.toml|config.ron]`

mod camera;
mod frame_uniforms;
mod timeout;

use std::sync::Arc;
use std::time::Duration;

use forge_engine::config::ConfigError;
use forge_engine::foundation::logging::{self, LevelFilter};
use forge_engine::prelude::*;
use thiserror::Error;

use camera::OrbitCamera;
use frame_uniforms::FrameUniforms;
use timeout::Timeout;

const RUN_TIME: Duration = Duration::from_secs(3);

/// Demo setup errors
#[derive(Error, Debug)]
enum DemoError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("GPU error: {0}")]
    Gpu(#[from] VulkanError),
}

/// Counts update ticks and reports the camera once per second
struct DemoGame {
    ticks: u64,
    report_every: u64,
}

impl Game for DemoGame {
    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
        self.ticks += 1;
        if self.ticks % self.report_every == 0 {
            if let Some(camera) = ctx.module::<OrbitCamera>() {
                log::debug!("Tick {}: camera at {:.2} rad", self.ticks, camera.angle());
            }
        }
        Ok(())
    }
}

impl Drop for DemoGame {
    fn drop(&mut self) {
        log::info!("Game finished after {} update ticks", self.ticks);
    }
}

fn load_config() -> Result<EngineConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(path),
        None => Ok(EngineConfig {
            fps_limit: Some(60.0),
            ..EngineConfig::default()
        }),
    }
}

fn setup(config: EngineConfig, context: &Arc<GpuContext>) -> Result<Engine, DemoError> {
    let frames_in_flight = config.frames_in_flight;
    let report_every = config.updates_per_second.round().max(1.0) as u64;

    let mut engine = Engine::new(config)?;
    engine.add_module(Stage::Always, Timeout::new(RUN_TIME))?;
    engine.add_module(Stage::UpdateNormal, OrbitCamera::new(6.0, 2.0, 0.8, 16.0 / 9.0))?;
    engine.add_module(Stage::Render, FrameUniforms::new(context, frames_in_flight)?)?;
    engine.set_game(DemoGame { ticks: 0, report_every });
    Ok(engine)
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };
    logging::init_with_level(config.level_filter().unwrap_or(LevelFilter::Info));
    log::info!("Starting forge demo");

    let context = GpuContext::new(Arc::new(HeadlessDevice::new()));
    let status = match setup(config, &context) {
        Ok(mut engine) => engine.run(),
        Err(e) => {
            log::error!("Failed to set up demo: {}", e);
            EXIT_FAILURE
        }
    };

    match context.flush() {
        Ok(released) => log::debug!("Released {} GPU resources", released),
        Err(e) => log::warn!("Failed to release GPU resources: {}", e),
    }
    log::info!("Forge demo exited with status {}", status);
    std::process::exit(status);
}
