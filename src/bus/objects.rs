// src/bus/objects.rs

//! Exported objects: the path → handler table and per-object method dispatch.

use std::collections::HashMap;

use log::{debug, warn};

use super::methods::{
    error_names, introspection_xml, EchoMethod, Interface, IntrospectableMethod, WindowMethod,
    INTROSPECTABLE_INTERFACE,
};
use super::{Arg, HandlerResult, MethodCall, Reply};
use crate::color::Color;
use crate::display::{DisplayServer, SurfaceId};
use crate::window::{WindowObject, WindowRegistry};

/// What lives at an exported path.
///
/// Windows are referenced by surface id; the [`WindowRegistry`] owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectHandler {
    Echo,
    Window(SurfaceId),
}

/// Maps exported object paths to their handlers.
#[derive(Debug, Default)]
pub struct DispatchTable {
    entries: HashMap<String, ObjectHandler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and leaves the table unchanged if `path` is taken.
    pub fn insert(&mut self, path: &str, handler: ObjectHandler) -> bool {
        if self.entries.contains_key(path) {
            warn!("Object path {} is already exported", path);
            return false;
        }
        self.entries.insert(path.to_string(), handler);
        true
    }

    pub fn remove(&mut self, path: &str) -> Option<ObjectHandler> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<ObjectHandler> {
        self.entries.get(path).copied()
    }

    /// Exported paths in sorted order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How an object classifies a call before running any method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved<M> {
    Introspect,
    Method(M),
    UnknownMember,
    NotOurs,
}

fn resolve<I: Interface>(call: &MethodCall) -> Resolved<I> {
    match call.interface.as_deref() {
        Some(INTROSPECTABLE_INTERFACE) => match IntrospectableMethod::from_member(&call.member) {
            Some(IntrospectableMethod::Introspect) => Resolved::Introspect,
            None => Resolved::UnknownMember,
        },
        Some(name) if name == I::NAME => {
            I::from_member(&call.member).map_or(Resolved::UnknownMember, Resolved::Method)
        }
        Some(_) => Resolved::NotOurs,
        None => {
            if let Some(method) = I::from_member(&call.member) {
                Resolved::Method(method)
            } else if IntrospectableMethod::from_member(&call.member).is_some() {
                Resolved::Introspect
            } else {
                Resolved::UnknownMember
            }
        }
    }
}

/// Shared dispatch for an object implementing `I`: introspection, member
/// lookup and signature checking happen here, `invoke` only sees calls
/// whose arguments match the method signature.
fn handle_object<I: Interface>(
    call: &MethodCall,
    invoke: impl FnOnce(I, &[Arg]) -> Reply,
) -> HandlerResult {
    match resolve::<I>(call) {
        Resolved::NotOurs => HandlerResult::NotYetHandled,
        Resolved::Introspect => {
            HandlerResult::Handled(Reply::Return(vec![Arg::Str(introspection_xml::<I>())]))
        }
        Resolved::UnknownMember => {
            debug!("No member {} on {} at {}", call.member, I::NAME, call.path);
            HandlerResult::Handled(Reply::error(
                error_names::UNKNOWN_METHOD,
                format!(
                    "No method \"{}\" on interface \"{}\"",
                    call.member,
                    call.interface.as_deref().unwrap_or(I::NAME)
                ),
            ))
        }
        Resolved::Method(method) => {
            let expected = method.spec().input_signature();
            let actual = call.signature();
            if actual != expected {
                return HandlerResult::Handled(Reply::error(
                    error_names::INVALID_ARGS,
                    format!(
                        "{} expects signature \"{}\", got \"{}\"",
                        method.spec().name,
                        expected,
                        actual
                    ),
                ));
            }
            HandlerResult::Handled(invoke(method, &call.args))
        }
    }
}

fn invalid_args(method: &str) -> Reply {
    Reply::error(error_names::INVALID_ARGS, format!("bad arguments to {}", method))
}

fn echo(method: EchoMethod, args: &[Arg]) -> Reply {
    match (method, args) {
        (EchoMethod::Echo, [Arg::Str(text)]) => Reply::Return(vec![Arg::Str(text.clone())]),
        (EchoMethod::Echo, _) => invalid_args("Echo"),
    }
}

fn window_method(
    window: &mut WindowObject,
    display: &mut dyn DisplayServer,
    method: WindowMethod,
    args: &[Arg],
) -> Reply {
    match (method, args) {
        (WindowMethod::SetColor, [Arg::U32(packed)]) => {
            if *packed > 0x00FF_FFFF {
                return Reply::error(
                    error_names::INVALID_ARGS,
                    format!("color {:#x} does not fit in 24 bits", packed),
                );
            }
            match window.set_color(display, Color::from_packed(*packed)) {
                Ok(()) => Reply::empty(),
                Err(e) => {
                    warn!("SetColor on window {} failed: {:#}", window.surface(), e);
                    Reply::error(error_names::FAILED, format!("{:#}", e))
                }
            }
        }
        (WindowMethod::SetColor, _) => invalid_args("SetColor"),
    }
}

impl ObjectHandler {
    /// Offers `call` to this object.
    ///
    /// A window that is no longer registered answers `NotYetHandled`.
    pub fn handle(
        self,
        call: &MethodCall,
        windows: &mut WindowRegistry,
        display: &mut dyn DisplayServer,
    ) -> HandlerResult {
        match self {
            ObjectHandler::Echo => handle_object::<EchoMethod>(call, echo),
            ObjectHandler::Window(surface) => match windows.get_mut(surface) {
                Some(window) => handle_object::<WindowMethod>(call, |method, args| {
                    window_method(window, display, method, args)
                }),
                None => {
                    debug!("Call for window {} that no longer exists", surface);
                    HandlerResult::NotYetHandled
                }
            },
        }
    }
}
