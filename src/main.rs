// In src/main.rs

use winbus::{
    bus::libdbus::LibDbus,
    config::CONFIG,
    display::x11::XlibDisplay,
    error::fatal_kind,
    event_loop::EventLoop,
};

// Logging
use anyhow::Context;
use log::{error, info};

/// Main entry point for the `winbus` service.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting winbus...");

    // --- Configuration ---
    let config = &*CONFIG;
    info!(
        "Configuration: {} window(s) at {}x{}, bus name {}",
        config.window.count, config.window.width, config.window.height, config.bus.name
    );

    // --- Connections ---
    let display = XlibDisplay::connect().context("Failed to initialize the display connection")?;
    let bus = LibDbus::connect_session().context("Failed to initialize the bus connection")?;

    // --- Event loop ---
    let mut event_loop = EventLoop::new(display, bus, config).context("Failed to start the event loop")?;

    let err = match event_loop.run() {
        Ok(never) => match never {},
        Err(err) => err,
    };
    match fatal_kind(&err) {
        Some(kind) => error!("Fatal: {}. Shutting down.", kind),
        None => error!("Event loop stopped: {:#}", err),
    }
    Err(err)
}
