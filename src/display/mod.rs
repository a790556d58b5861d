// src/display/mod.rs

//! The display-server collaborator.
//!
//! The event core never talks to a display server directly. It sees one
//! connection through [`DisplayServer`]: a stable descriptor to wait on,
//! surfaces and drawing contexts addressed by id, and a queue of
//! [`DisplayEvent`]s.
//!
//! - `x11`: Xlib-backed implementation (feature `x11`).
//! - `mock`: recording implementation for tests.

#[cfg(test)]
pub mod mock;
#[cfg(feature = "x11")]
pub mod x11;

use anyhow::Result;
use bitflags::bitflags;
use std::fmt;
use std::os::unix::io::RawFd;

use crate::color::Color;

/// Identifier of an on-screen surface, assigned by the display server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a drawing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

/// A rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect { x, y, width, height }
    }

    /// The rectangle covering a whole surface of `size`.
    pub const fn covering(size: Size) -> Self {
        Rect::new(0, 0, size.width, size.height)
    }
}

/// Current extent of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

bitflags! {
    /// Event classes a surface asks the server to deliver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const EXPOSURE = 1 << 0;
        const STRUCTURE = 1 << 1;
    }
}

/// One event taken off the display connection.
///
/// The set is closed: anything the core does not act on arrives as
/// `Unknown` with the raw protocol code, so a new server-side event can
/// never be confused with a handled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// A protocol-level error notification (response code 0 on the wire).
    Error { code: u8, resource: u64 },
    /// `rect` of `surface` needs repainting.
    Expose { surface: SurfaceId, rect: Rect },
    /// Any other response code.
    Unknown { code: u8 },
}

/// Operations the core needs from a display server connection.
///
/// Drawing calls queue requests; nothing is guaranteed visible before
/// [`DisplayServer::flush`].
pub trait DisplayServer {
    /// Descriptor that becomes readable when the server has sent something.
    /// Stable for the lifetime of the connection.
    fn connection_fd(&self) -> RawFd;

    /// Creates a top-level surface. It stays invisible until mapped.
    fn create_surface(&mut self, geometry: Rect, events: EventMask) -> Result<SurfaceId>;

    fn map_surface(&mut self, surface: SurfaceId) -> Result<()>;

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<()>;

    /// Creates a drawing context for `surface` whose fill color is `color`.
    fn create_draw_context(&mut self, surface: SurfaceId, color: Color) -> Result<ContextId>;

    fn set_draw_color(&mut self, context: ContextId, color: Color) -> Result<()>;

    fn destroy_draw_context(&mut self, context: ContextId) -> Result<()>;

    /// Fills `rect` of `surface` with the current color of `context`.
    fn fill_rect(&mut self, surface: SurfaceId, context: ContextId, rect: Rect) -> Result<()>;

    /// Asks the server for the current extent of `surface`. This is a round
    /// trip and may pull further events into the local queue.
    fn query_geometry(&mut self, surface: SurfaceId) -> Result<Size>;

    fn flush(&mut self) -> Result<()>;

    /// Takes the next queued event without blocking.
    fn poll_event(&mut self) -> Option<DisplayEvent>;

    /// True once the connection has failed. `poll_event` returning `None`
    /// means "drained" only while this is false.
    fn has_error(&self) -> bool;

    /// True if events are already buffered locally, so waiting on the
    /// descriptor would not report them.
    fn has_queued_events(&mut self) -> bool {
        false
    }
}
