// src/bus/mod.rs

//! The message-bus collaborator.
//!
//! The core owns the routing ([`objects::DispatchTable`]) and the watch
//! registry; the bus library owns the connection, the wire format and its
//! watch objects. [`MessageBus`] is the seam between the two.
//!
//! - `libdbus`: libdbus-backed implementation (feature `dbus`).
//! - `mock`: scriptable implementation for tests.

#[cfg(feature = "dbus")]
pub mod libdbus;
pub mod methods;
#[cfg(test)]
pub mod mock;
pub mod objects;

use anyhow::Result;

use crate::watch::{SharedWatchRegistry, WatchFlags, WatchId};

/// A single argument value of the types this service speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    U32(u32),
    I32(i32),
    Bool(bool),
    /// Any other type, by its signature code.
    Other(char),
}

impl Arg {
    /// Signature code of this argument.
    pub fn signature(&self) -> char {
        match self {
            Arg::Str(_) => 's',
            Arg::U32(_) => 'u',
            Arg::I32(_) => 'i',
            Arg::Bool(_) => 'b',
            Arg::Other(code) => *code,
        }
    }
}

/// An incoming method call, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub path: String,
    /// Absent when the caller did not name one; matched by member only.
    pub interface: Option<String>,
    pub member: String,
    pub args: Vec<Arg>,
}

impl MethodCall {
    pub fn new(path: &str, interface: Option<&str>, member: &str, args: Vec<Arg>) -> Self {
        MethodCall {
            path: path.to_string(),
            interface: interface.map(str::to_string),
            member: member.to_string(),
            args,
        }
    }

    /// Concatenated signature codes of the arguments.
    pub fn signature(&self) -> String {
        self.args.iter().map(Arg::signature).collect()
    }
}

/// What to send back for a handled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A method return carrying `values` (possibly none).
    Return(Vec<Arg>),
    /// An error reply.
    Error { name: String, message: String },
}

impl Reply {
    pub fn empty() -> Self {
        Reply::Return(Vec::new())
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of offering a call to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    /// The call was ours; the bus sends `Reply` to the caller.
    Handled(Reply),
    /// Not ours. The bus may try other handlers or answer on its own.
    NotYetHandled,
}

/// Receives decoded calls during [`MessageBus::dispatch_pending`].
pub trait MessageRouter {
    fn route(&mut self, call: &MethodCall) -> HandlerResult;
}

/// Operations the core needs from a message-bus connection.
///
/// Any method may add, remove or toggle watches through the registry handed
/// to [`MessageBus::set_watch_registry`], synchronously and on this thread.
/// Callers must not hold a borrow of that registry across these calls.
pub trait MessageBus {
    /// Starts reporting watch changes into `registry`. Watches that already
    /// exist are reported before this returns.
    fn set_watch_registry(&mut self, registry: SharedWatchRegistry) -> Result<()>;

    /// Requests a well-known name. `Ok(true)` if we are now its primary owner.
    fn request_name(&mut self, name: &str) -> Result<bool>;

    fn unique_name(&self) -> Result<String>;

    /// Starts delivering calls addressed to `path` to the router.
    fn register_path(&mut self, path: &str) -> Result<()>;

    fn unregister_path(&mut self, path: &str) -> Result<()>;

    /// Lets the bus process I/O for a watch that `poll(2)` found ready.
    fn handle_watch(&mut self, watch: WatchId, readiness: WatchFlags) -> Result<()>;

    /// Delivers every complete incoming call to `router` and sends the replies.
    fn dispatch_pending(&mut self, router: &mut dyn MessageRouter) -> Result<()>;

    /// True if complete messages are already buffered, so waiting on the
    /// watches would not report them. Blocking round trips such as
    /// `request_name` can leave messages behind this way.
    fn has_pending_dispatch(&mut self) -> bool {
        false
    }
}
