// src/event_loop/mod.rs

//! The wait → dispatch → repeat cycle.
//!
//! One iteration:
//! 1. Build a fresh [`PollSet`] from the display descriptor and the current
//!    watch registry.
//! 2. Block until something is ready (zero timeout if the display or the
//!    bus already holds buffered input).
//! 3. Drain display events, then hand ready watches to the bus, then run
//!    the bus dispatch step. A fatal error in any step ends the iteration
//!    before the next step runs.


use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

use crate::bus::objects::{DispatchTable, ObjectHandler};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::dispatch::{BusEventDispatcher, DisplayEventDispatcher, ObjectRouter};
use crate::display::{DisplayServer, SurfaceId};
use crate::os::poll::PollSet;
use crate::watch::{SharedWatchRegistry, WatchRegistry};
use crate::window::{WindowObject, WindowRegistry};

/// Owns both connections and everything routed between them.
///
/// Every live window has exactly one entry in `windows` (by surface) and one
/// in `objects` (by path); both are added and removed together.
pub struct EventLoop<D: DisplayServer, B: MessageBus> {
    display: D,
    bus: B,
    watches: SharedWatchRegistry,
    windows: WindowRegistry,
    objects: DispatchTable,
    config: Config,
    bus_name: String,
}

impl<D: DisplayServer, B: MessageBus> EventLoop<D, B> {
    /// Wires the bus to a fresh watch registry, claims the configured name,
    /// exports the echo object and opens `config.window.count` windows.
    pub fn new(display: D, mut bus: B, config: &Config) -> Result<Self> {
        let watches = WatchRegistry::shared();
        bus.set_watch_registry(Rc::clone(&watches))
            .context("Failed to install bus watch callbacks")?;

        let bus_name = match bus.request_name(&config.bus.name) {
            Ok(true) => {
                info!("Acquired bus name {}", config.bus.name);
                config.bus.name.clone()
            }
            Ok(false) => {
                let unique = bus.unique_name()?;
                warn!(
                    "Bus name {} is taken; continuing as {}",
                    config.bus.name, unique
                );
                unique
            }
            Err(e) => {
                let unique = bus.unique_name()?;
                warn!(
                    "Requesting bus name {} failed ({:#}); continuing as {}",
                    config.bus.name, e, unique
                );
                unique
            }
        };

        let mut event_loop = Self {
            display,
            bus,
            watches,
            windows: WindowRegistry::new(),
            objects: DispatchTable::new(),
            config: config.clone(),
            bus_name,
        };

        let echo_path = event_loop.config.bus.echo_path.clone();
        event_loop.export(&echo_path, ObjectHandler::Echo);

        for _ in 0..event_loop.config.window.count {
            event_loop.open_window()?;
        }
        info!(
            "Event loop ready as {} with {} window(s)",
            event_loop.bus_name,
            event_loop.windows.len()
        );
        Ok(event_loop)
    }

    /// Registers `path` with the bus and records its handler. A refused bus
    /// registration is logged; the object stays in the local table.
    fn export(&mut self, path: &str, handler: ObjectHandler) {
        if let Err(e) = self.bus.register_path(path) {
            warn!("Failed to register bus path {}: {:#}", path, e);
        }
        self.objects.insert(path, handler);
        debug!("Exported {:?} at {}", handler, path);
    }

    /// Creates a window and makes it reachable by surface and by path.
    ///
    /// A surface id that already belongs to a live window is refused before
    /// anything is exported; the new drawing context is released.
    pub fn open_window(&mut self) -> Result<SurfaceId> {
        let window = WindowObject::create(
            &mut self.display,
            &self.config.window,
            &self.config.bus.windows_root,
        )?;
        let surface = window.surface();
        if self.windows.contains(surface) {
            if let Err(e) = window.discard(&mut self.display) {
                warn!("Failed to release context of duplicate window {}: {:#}", surface, e);
            }
            return Err(anyhow!("surface {} already belongs to a live window", surface));
        }
        let path = window.path().to_string();
        self.windows.insert(window);
        self.export(&path, ObjectHandler::Window(surface));
        Ok(surface)
    }

    /// Tears a window down: bus path first, then both lookup entries, then
    /// the display resources. Returns `false` if no such window is live.
    pub fn close_window(&mut self, surface: SurfaceId) -> Result<bool> {
        let Some(path) = self.windows.get(surface).map(|w| w.path().to_string()) else {
            warn!("Asked to close unknown window {}", surface);
            return Ok(false);
        };
        if let Err(e) = self.bus.unregister_path(&path) {
            warn!("Failed to unregister bus path {}: {:#}", path, e);
        }
        self.objects.remove(&path);
        if let Some(mut window) = self.windows.remove(surface) {
            window
                .destroy(&mut self.display)
                .with_context(|| format!("Failed to destroy window {}", surface))?;
        }
        Ok(true)
    }

    /// Wait-set for the current registry state.
    pub fn poll_set(&self) -> PollSet {
        let watches = self.watches.borrow().snapshot();
        PollSet::build(self.display.connection_fd(), &watches)
    }

    /// One full iteration: build, wait, dispatch.
    pub fn run_once(&mut self) -> Result<()> {
        let mut poll_set = self.poll_set();
        let buffered = self.display.has_queued_events() || self.bus.has_pending_dispatch();
        let timeout = buffered.then_some(Duration::ZERO);
        let ready = poll_set.wait(timeout)?;
        trace!("Woke with {} ready entries", ready);
        self.dispatch(&poll_set)
    }

    /// Acts on the readiness recorded in `poll_set`, in fixed order.
    ///
    /// The bus dispatch step runs every time, whether or not a watch was
    /// ready, since handling a watch earlier may have completed a message.
    pub fn dispatch(&mut self, poll_set: &PollSet) -> Result<()> {
        if !poll_set.display_readiness().is_empty() || self.display.has_queued_events() {
            DisplayEventDispatcher::drain(&mut self.display, &mut self.windows)?;
        }

        BusEventDispatcher::handle_ready_watches(&mut self.bus, &self.watches, poll_set)?;

        let mut router = ObjectRouter {
            table: &self.objects,
            windows: &mut self.windows,
            display: &mut self.display,
        };
        BusEventDispatcher::dispatch_messages(&mut self.bus, &mut router)
    }

    /// Runs until a fatal error.
    pub fn run(&mut self) -> Result<Infallible> {
        info!("Entering event loop");
        loop {
            self.run_once()?;
        }
    }

    /// Name we are reachable under: the configured one, or the unique
    /// connection name if that was taken.
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn windows(&self) -> &WindowRegistry {
        &self.windows
    }

    pub fn objects(&self) -> &DispatchTable {
        &self.objects
    }

    pub fn watches(&self) -> &SharedWatchRegistry {
        &self.watches
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

impl<D: DisplayServer, B: MessageBus> Drop for EventLoop<D, B> {
    fn drop(&mut self) {
        for surface in self.windows.surfaces() {
            if let Err(e) = self.close_window(surface) {
                warn!("Failed to close window {} on shutdown: {:#}", surface, e);
            }
        }
        if let Err(e) = self.bus.unregister_path(&self.config.bus.echo_path) {
            debug!("Echo path already gone: {:#}", e);
        }
    }
}
