// src/dispatch/bus.rs

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::bus::objects::DispatchTable;
use crate::bus::{HandlerResult, MessageBus, MessageRouter, MethodCall};
use crate::display::DisplayServer;
use crate::os::poll::PollSet;
use crate::watch::SharedWatchRegistry;
use crate::window::WindowRegistry;

/// Routes incoming calls by object path for the duration of one dispatch.
pub struct ObjectRouter<'a> {
    pub table: &'a DispatchTable,
    pub windows: &'a mut WindowRegistry,
    pub display: &'a mut dyn DisplayServer,
}

impl MessageRouter for ObjectRouter<'_> {
    fn route(&mut self, call: &MethodCall) -> HandlerResult {
        match self.table.get(&call.path) {
            Some(handler) => {
                trace!("{} on {} -> {:?}", call.member, call.path, handler);
                handler.handle(call, self.windows, self.display)
            }
            None => {
                debug!("No object at {} for {}", call.path, call.member);
                HandlerResult::NotYetHandled
            }
        }
    }
}

pub struct BusEventDispatcher;

impl BusEventDispatcher {
    /// Gives every ready watch's observed readiness back to the bus.
    ///
    /// `handle_watch` may add or remove watches through `registry`, so each
    /// watch is looked up again right before it is handed back; one removed
    /// earlier in this pass is skipped. No borrow of `registry` is held
    /// across a bus call.
    ///
    /// Returns how many watches were handled.
    pub fn handle_ready_watches(
        bus: &mut dyn MessageBus,
        registry: &SharedWatchRegistry,
        poll_set: &PollSet,
    ) -> Result<usize> {
        let mut handled = 0;
        for (id, readiness) in poll_set.ready_watches() {
            let registered = registry.borrow().contains(id);
            if !registered {
                debug!("Watch {:?} went away before it could be handled", id);
                continue;
            }
            trace!("Handling watch {:?} with {:?}", id, readiness);
            bus.handle_watch(id, readiness)
                .with_context(|| format!("Failed to handle bus watch {:?}", id))?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Runs the bus dispatch step once, routing every complete call.
    pub fn dispatch_messages(bus: &mut dyn MessageBus, router: &mut dyn MessageRouter) -> Result<()> {
        bus.dispatch_pending(router)
            .context("Failed to dispatch bus messages")
    }
}
