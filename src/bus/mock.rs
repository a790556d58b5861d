// src/bus/mock.rs

//! Scriptable message bus for tests.

use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, VecDeque};

use super::methods::error_names;
use super::{HandlerResult, MessageBus, MessageRouter, MethodCall, Reply};
use crate::watch::{SharedWatchRegistry, Watch, WatchFlags, WatchId, WatchRegistry};

/// Runs inside `handle_watch`, the way a real bus adds or drops watches
/// while processing I/O.
pub type WatchHook = Box<dyn FnMut(WatchId, &mut WatchRegistry)>;

pub struct MockBus {
    registry: Option<SharedWatchRegistry>,
    /// Watches reported as soon as a registry is installed.
    pub initial_watches: Vec<Watch>,
    pub unique: String,
    pub name_available: bool,
    pub requested_names: Vec<String>,
    pub registered: BTreeSet<String>,
    pub fail_register: bool,
    /// Calls delivered on the next `dispatch_pending`.
    pub inbox: VecDeque<MethodCall>,
    /// Calls a handler claimed, with the reply it produced.
    pub replies: Vec<(MethodCall, Reply)>,
    /// Calls no handler claimed; answered with `UnknownMethod`.
    pub unhandled: Vec<MethodCall>,
    pub handled_watches: Vec<(WatchId, WatchFlags)>,
    pub dispatch_count: usize,
    pub on_handle_watch: Option<WatchHook>,
    /// Report a non-empty inbox as already buffered, as after a round trip.
    pub buffered: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            registry: None,
            initial_watches: Vec::new(),
            unique: ":1.42".to_string(),
            name_available: true,
            requested_names: Vec::new(),
            registered: BTreeSet::new(),
            fail_register: false,
            inbox: VecDeque::new(),
            replies: Vec::new(),
            unhandled: Vec::new(),
            handled_watches: Vec::new(),
            dispatch_count: 0,
            on_handle_watch: None,
            buffered: false,
        }
    }

    pub fn with_watches(watches: Vec<Watch>) -> Self {
        Self {
            initial_watches: watches,
            ..Self::new()
        }
    }

    /// Queues an incoming call for the next dispatch.
    pub fn deliver(&mut self, call: MethodCall) {
        self.inbox.push_back(call);
    }

    pub fn registry(&self) -> Option<&SharedWatchRegistry> {
        self.registry.as_ref()
    }
}

impl MessageBus for MockBus {
    fn set_watch_registry(&mut self, registry: SharedWatchRegistry) -> Result<()> {
        {
            let mut watches = registry.borrow_mut();
            for watch in &self.initial_watches {
                watches.add(*watch);
            }
        }
        self.registry = Some(registry);
        Ok(())
    }

    fn request_name(&mut self, name: &str) -> Result<bool> {
        self.requested_names.push(name.to_string());
        Ok(self.name_available)
    }

    fn unique_name(&self) -> Result<String> {
        Ok(self.unique.clone())
    }

    fn register_path(&mut self, path: &str) -> Result<()> {
        if self.fail_register {
            return Err(anyhow!("object path {} refused", path));
        }
        if !self.registered.insert(path.to_string()) {
            return Err(anyhow!("object path {} already in use", path));
        }
        Ok(())
    }

    fn unregister_path(&mut self, path: &str) -> Result<()> {
        if self.registered.remove(path) {
            Ok(())
        } else {
            Err(anyhow!("object path {} was not registered", path))
        }
    }

    fn handle_watch(&mut self, watch: WatchId, readiness: WatchFlags) -> Result<()> {
        self.handled_watches.push((watch, readiness));
        if let (Some(hook), Some(registry)) = (self.on_handle_watch.as_mut(), self.registry.as_ref()) {
            hook(watch, &mut registry.borrow_mut());
        }
        Ok(())
    }

    fn dispatch_pending(&mut self, router: &mut dyn MessageRouter) -> Result<()> {
        self.dispatch_count += 1;
        while let Some(call) = self.inbox.pop_front() {
            let registered = self.registered.contains(&call.path);
            match registered.then(|| router.route(&call)) {
                Some(HandlerResult::Handled(reply)) => self.replies.push((call, reply)),
                Some(HandlerResult::NotYetHandled) | None => {
                    let reply = Reply::error(
                        error_names::UNKNOWN_METHOD,
                        format!("No handler for {} at {}", call.member, call.path),
                    );
                    self.unhandled.push(call.clone());
                    self.replies.push((call, reply));
                }
            }
        }
        Ok(())
    }

    fn has_pending_dispatch(&mut self) -> bool {
        self.buffered && !self.inbox.is_empty()
    }
}
