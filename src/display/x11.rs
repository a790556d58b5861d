// src/display/x11.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

//! Xlib implementation of [`DisplayServer`].
//!
//! Xlib reports protocol errors through a process-wide callback rather than
//! the event queue. The handler installed here parks them in a static queue
//! and `poll_event` hands them out ahead of regular events, so the core sees
//! a single ordered stream.

use anyhow::{anyhow, Context, Result};
use libc::{c_int, c_uint, c_ulong};
use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use x11::xlib;

use super::{ContextId, DisplayEvent, DisplayServer, EventMask, Rect, Size, SurfaceId};
use crate::color::Color;
use crate::error::FatalError;

/// Protocol errors reported by Xlib's error callback, oldest first.
static PENDING_ERRORS: Mutex<VecDeque<(u8, u64)>> = Mutex::new(VecDeque::new());
/// Set by the I/O error callback. Xlib terminates the process right after
/// the callback returns, so this only matters for code running inside it.
static IO_FAILED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn on_protocol_error(
    _display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    if event.is_null() {
        return 0;
    }
    // SAFETY: Xlib passes a valid error event for the duration of the call.
    let (code, resource) = unsafe { ((*event).error_code, (*event).resourceid as u64) };
    match PENDING_ERRORS.lock() {
        Ok(mut queue) => queue.push_back((code, resource)),
        Err(_) => error!("X11 error {} on resource {:#x} lost: queue poisoned", code, resource),
    }
    0
}

unsafe extern "C" fn on_io_error(_display: *mut xlib::Display) -> c_int {
    IO_FAILED.store(true, Ordering::SeqCst);
    error!("X11 connection I/O error; the display connection is gone.");
    0
}

fn take_pending_error() -> Option<DisplayEvent> {
    let mut queue = PENDING_ERRORS.lock().ok()?;
    queue
        .pop_front()
        .map(|(code, resource)| DisplayEvent::Error { code, resource })
}

/// `QueuedAlready` mode of `XEventsQueued`; a C macro Xlib does not export.
const QUEUED_ALREADY: c_int = 0;

fn x_event_mask(events: EventMask) -> libc::c_long {
    let mut mask = xlib::NoEventMask;
    if events.contains(EventMask::EXPOSURE) {
        mask |= xlib::ExposureMask;
    }
    if events.contains(EventMask::STRUCTURE) {
        mask |= xlib::StructureNotifyMask;
    }
    mask
}

/// Owns the raw `*mut xlib::Display` and closes it on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens the display named by `$DISPLAY`.
    fn open() -> Result<Self> {
        // SAFETY: a null name makes Xlib read DISPLAY from the environment.
        let display_ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if display_ptr.is_null() {
            return Err(anyhow!(FatalError::DisplayConnect)).context(
                "XOpenDisplay returned null. Check the DISPLAY environment variable or X server status.",
            );
        }
        debug!("X display opened: {:p}", display_ptr);
        Ok(Self { ptr: display_ptr })
    }

    #[inline]
    fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            info!("Closing X11 display connection: {:p}", self.ptr);
            // SAFETY: the pointer came from XOpenDisplay and is closed once.
            unsafe {
                xlib::XCloseDisplay(self.ptr);
            }
        }
    }
}

/// A connection to an X server driven through Xlib.
pub struct XlibDisplay {
    managed_display: ManagedDisplay,
    root: xlib::Window,
    screen: c_int,
    contexts: HashMap<ContextId, xlib::GC>,
    next_context: u64,
}

impl XlibDisplay {
    /// Connects to the X server and installs the error callbacks.
    pub fn connect() -> Result<Self> {
        info!("Establishing X11 server connection.");
        let managed_display = ManagedDisplay::open()?;
        let display = managed_display.raw();

        // SAFETY: `display` is a live connection; handlers are plain functions.
        let (screen, root) = unsafe {
            xlib::XSetErrorHandler(Some(on_protocol_error));
            xlib::XSetIOErrorHandler(Some(on_io_error));
            let screen = xlib::XDefaultScreen(display);
            (screen, xlib::XRootWindow(display, screen))
        };
        debug!("Default screen {}, root window {}", screen, root);

        info!("X11 server connection established.");
        Ok(Self {
            managed_display,
            root,
            screen,
            contexts: HashMap::new(),
            next_context: 1,
        })
    }

    #[inline]
    fn display(&self) -> *mut xlib::Display {
        self.managed_display.raw()
    }

    fn gc(&self, context: ContextId) -> Result<xlib::GC> {
        self.contexts
            .get(&context)
            .copied()
            .ok_or_else(|| anyhow!("unknown drawing context {:?}", context))
    }
}

impl DisplayServer for XlibDisplay {
    fn connection_fd(&self) -> RawFd {
        // SAFETY: valid for the lifetime of the connection.
        unsafe { xlib::XConnectionNumber(self.display()) }
    }

    fn create_surface(&mut self, geometry: Rect, events: EventMask) -> Result<SurfaceId> {
        let display = self.display();
        // SAFETY: Xlib calls on a live connection with a zeroed attribute struct.
        let window = unsafe {
            let mut attributes: xlib::XSetWindowAttributes = mem::zeroed();
            attributes.event_mask = x_event_mask(events);
            attributes.background_pixel = xlib::XWhitePixel(display, self.screen);
            xlib::XCreateWindow(
                display,
                self.root,
                geometry.x as c_int,
                geometry.y as c_int,
                geometry.width as c_uint,
                geometry.height as c_uint,
                0,
                xlib::CopyFromParent,
                xlib::InputOutput as c_uint,
                ptr::null_mut(), // CopyFromParent visual
                xlib::CWEventMask | xlib::CWBackPixel,
                &mut attributes,
            )
        };
        if window == 0 {
            return Err(anyhow!("XCreateWindow failed"));
        }
        debug!("X window created (ID: {}) at {:?}", window, geometry);
        Ok(SurfaceId(window as u64))
    }

    fn map_surface(&mut self, surface: SurfaceId) -> Result<()> {
        // SAFETY: live connection; an unknown window only yields a protocol error.
        unsafe { xlib::XMapWindow(self.display(), surface.0 as xlib::Window) };
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<()> {
        // SAFETY: as above.
        unsafe { xlib::XDestroyWindow(self.display(), surface.0 as xlib::Window) };
        debug!("X window destroyed (ID: {})", surface);
        Ok(())
    }

    fn create_draw_context(&mut self, surface: SurfaceId, color: Color) -> Result<ContextId> {
        let display = self.display();
        // SAFETY: null values with an empty mask are allowed by XCreateGC.
        let gc = unsafe { xlib::XCreateGC(display, surface.0 as xlib::Drawable, 0, ptr::null_mut()) };
        if gc.is_null() {
            return Err(anyhow!("XCreateGC failed for window {}", surface));
        }
        // SAFETY: `gc` was just created on this display.
        unsafe { xlib::XSetForeground(display, gc, color.packed() as c_ulong) };

        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.insert(id, gc);
        trace!("GC {:?} created for window {} with color {}", id, surface, color);
        Ok(id)
    }

    fn set_draw_color(&mut self, context: ContextId, color: Color) -> Result<()> {
        let gc = self.gc(context)?;
        // SAFETY: `gc` belongs to this display.
        unsafe { xlib::XSetForeground(self.display(), gc, color.packed() as c_ulong) };
        Ok(())
    }

    fn destroy_draw_context(&mut self, context: ContextId) -> Result<()> {
        let gc = self
            .contexts
            .remove(&context)
            .ok_or_else(|| anyhow!("unknown drawing context {:?}", context))?;
        // SAFETY: removed from the map, so freed exactly once.
        unsafe { xlib::XFreeGC(self.display(), gc) };
        Ok(())
    }

    fn fill_rect(&mut self, surface: SurfaceId, context: ContextId, rect: Rect) -> Result<()> {
        let gc = self.gc(context)?;
        // SAFETY: live connection and GC.
        unsafe {
            xlib::XFillRectangle(
                self.display(),
                surface.0 as xlib::Drawable,
                gc,
                rect.x as c_int,
                rect.y as c_int,
                rect.width as c_uint,
                rect.height as c_uint,
            )
        };
        Ok(())
    }

    fn query_geometry(&mut self, surface: SurfaceId) -> Result<Size> {
        let mut root: xlib::Window = 0;
        let (mut x, mut y): (c_int, c_int) = (0, 0);
        let (mut width, mut height, mut border, mut depth): (c_uint, c_uint, c_uint, c_uint) =
            (0, 0, 0, 0);
        // SAFETY: all out-pointers refer to live locals.
        let status = unsafe {
            xlib::XGetGeometry(
                self.display(),
                surface.0 as xlib::Drawable,
                &mut root,
                &mut x,
                &mut y,
                &mut width,
                &mut height,
                &mut border,
                &mut depth,
            )
        };
        if status == 0 {
            return Err(anyhow!("XGetGeometry failed for window {}", surface));
        }
        Ok(Size { width, height })
    }

    fn flush(&mut self) -> Result<()> {
        // SAFETY: live connection.
        unsafe { xlib::XFlush(self.display()) };
        Ok(())
    }

    fn poll_event(&mut self) -> Option<DisplayEvent> {
        if let Some(event) = take_pending_error() {
            return Some(event);
        }
        let display = self.display();
        // SAFETY: XPending never blocks; it reads whatever the socket holds.
        let pending = unsafe { xlib::XPending(display) };
        // Errors read by XPending are reported before the events that follow them.
        if let Some(event) = take_pending_error() {
            return Some(event);
        }
        if pending <= 0 {
            return None;
        }

        let mut xevent: xlib::XEvent = unsafe { mem::zeroed() };
        // SAFETY: XPending > 0 guarantees XNextEvent returns without blocking.
        unsafe { xlib::XNextEvent(display, &mut xevent) };
        // SAFETY: `type_` is the common discriminant of the XEvent union.
        let event_type = unsafe { xevent.type_ };

        match event_type {
            xlib::Expose => {
                // SAFETY: the discriminant says this is an expose event.
                let expose = unsafe { xevent.expose };
                trace!(
                    "XEvent: Expose (win: {}, x:{}, y:{}, w:{}, h:{}, count:{})",
                    expose.window, expose.x, expose.y, expose.width, expose.height, expose.count
                );
                Some(DisplayEvent::Expose {
                    surface: SurfaceId(expose.window as u64),
                    rect: Rect::new(expose.x, expose.y, expose.width as u32, expose.height as u32),
                })
            }
            other => Some(DisplayEvent::Unknown { code: other as u8 }),
        }
    }

    fn has_error(&self) -> bool {
        IO_FAILED.load(Ordering::SeqCst)
    }

    fn has_queued_events(&mut self) -> bool {
        // SAFETY: QUEUED_ALREADY only inspects the local queue.
        let queued = unsafe { xlib::XEventsQueued(self.display(), QUEUED_ALREADY) };
        queued > 0 || PENDING_ERRORS.lock().map(|q| !q.is_empty()).unwrap_or(false)
    }
}

impl Drop for XlibDisplay {
    fn drop(&mut self) {
        let display = self.display();
        for (id, gc) in self.contexts.drain() {
            warn!("GC {:?} still alive at disconnect; freeing it.", id);
            // SAFETY: each GC is owned by this map and freed once.
            unsafe { xlib::XFreeGC(display, gc) };
        }
        // ManagedDisplay's Drop closes the connection.
    }
}
