// src/display/mock.rs

//! Recording display server for tests.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use super::{ContextId, DisplayEvent, DisplayServer, EventMask, Rect, Size, SurfaceId};
use crate::color::Color;

/// A drawing request as the mock received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOp {
    /// `rect` of `surface` filled with the context color at call time.
    Fill { surface: SurfaceId, rect: Rect, color: Color },
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSurface {
    pub geometry: Rect,
    pub mapped: bool,
    pub events: EventMask,
}

pub struct MockDisplay {
    // `peer` is the "server" side; writing to it makes `end` readable.
    peer: UnixStream,
    end: UnixStream,
    next_id: u64,
    pub surfaces: BTreeMap<SurfaceId, MockSurface>,
    pub contexts: HashMap<ContextId, Color>,
    pub ops: Vec<DrawOp>,
    pub events: VecDeque<DisplayEvent>,
    pub io_error: bool,
    pub fail_geometry: bool,
    pub locally_queued: bool,
    /// Id handed out by the next `create_surface` instead of a fresh one.
    pub reuse_surface: Option<SurfaceId>,
}

impl MockDisplay {
    pub fn new() -> Self {
        let (peer, end) = UnixStream::pair().expect("socketpair for mock display");
        Self {
            peer,
            end,
            next_id: 0x40_0001,
            surfaces: BTreeMap::new(),
            contexts: HashMap::new(),
            ops: Vec::new(),
            events: VecDeque::new(),
            io_error: false,
            fail_geometry: false,
            locally_queued: false,
            reuse_surface: None,
        }
    }

    /// Queues `event` and makes the connection descriptor readable.
    pub fn push_event(&mut self, event: DisplayEvent) {
        self.events.push_back(event);
        self.wake();
    }

    /// Makes the connection descriptor readable without queueing anything.
    /// It stays readable from then on.
    pub fn wake(&mut self) {
        self.peer.write_all(&[0]).expect("write to mock display peer");
    }

    /// Simulates the user resizing `surface`.
    pub fn resize(&mut self, surface: SurfaceId, size: Size) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.geometry.width = size.width;
            s.geometry.height = size.height;
        }
    }

    /// Fills applied to `surface`, in order.
    pub fn fills(&self, surface: SurfaceId) -> Vec<(Rect, Color)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Fill { surface: s, rect, color } if *s == surface => Some((*rect, *color)),
                _ => None,
            })
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, DrawOp::Flush)).count()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl DisplayServer for MockDisplay {
    fn connection_fd(&self) -> RawFd {
        self.end.as_raw_fd()
    }

    fn create_surface(&mut self, geometry: Rect, events: EventMask) -> Result<SurfaceId> {
        let id = self.reuse_surface.take().unwrap_or_else(|| {
            let id = SurfaceId(self.next_id);
            self.next_id += 1;
            id
        });
        self.surfaces.entry(id).or_insert(MockSurface {
            geometry,
            mapped: false,
            events,
        });
        Ok(id)
    }

    fn map_surface(&mut self, surface: SurfaceId) -> Result<()> {
        let s = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| anyhow!("map of unknown surface {}", surface))?;
        s.mapped = true;
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<()> {
        self.surfaces
            .remove(&surface)
            .map(|_| ())
            .ok_or_else(|| anyhow!("destroy of unknown surface {}", surface))
    }

    fn create_draw_context(&mut self, surface: SurfaceId, color: Color) -> Result<ContextId> {
        if !self.surfaces.contains_key(&surface) {
            return Err(anyhow!("context for unknown surface {}", surface));
        }
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.contexts.insert(id, color);
        Ok(id)
    }

    fn set_draw_color(&mut self, context: ContextId, color: Color) -> Result<()> {
        let slot = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| anyhow!("unknown context {:?}", context))?;
        *slot = color;
        Ok(())
    }

    fn destroy_draw_context(&mut self, context: ContextId) -> Result<()> {
        self.contexts
            .remove(&context)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown context {:?}", context))
    }

    fn fill_rect(&mut self, surface: SurfaceId, context: ContextId, rect: Rect) -> Result<()> {
        let color = *self
            .contexts
            .get(&context)
            .ok_or_else(|| anyhow!("unknown context {:?}", context))?;
        self.ops.push(DrawOp::Fill { surface, rect, color });
        Ok(())
    }

    fn query_geometry(&mut self, surface: SurfaceId) -> Result<Size> {
        if self.fail_geometry {
            return Err(anyhow!("geometry query refused"));
        }
        let s = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| anyhow!("geometry of unknown surface {}", surface))?;
        Ok(Size {
            width: s.geometry.width,
            height: s.geometry.height,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.ops.push(DrawOp::Flush);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<DisplayEvent> {
        if self.io_error {
            return None;
        }
        self.events.pop_front()
    }

    fn has_error(&self) -> bool {
        self.io_error
    }

    fn has_queued_events(&mut self) -> bool {
        self.locally_queued && !self.events.is_empty()
    }
}
