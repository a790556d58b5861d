// src/window/mod.rs

//! Window objects: one surface, one drawing context, one bus path each.

pub mod registry;

pub use registry::WindowRegistry;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::color::Color;
use crate::config::WindowConfig;
use crate::display::{ContextId, DisplayServer, EventMask, Rect, SurfaceId};

/// Lifecycle of a [`WindowObject`]. There is no value for "uninitialized":
/// a `WindowObject` only exists once `create` has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Live,
    Destroyed,
}

/// Bus path of the window showing `surface`: `<windows_root>/<surface-id>`.
pub fn window_path(windows_root: &str, surface: SurfaceId) -> String {
    format!("{}/{}", windows_root.trim_end_matches('/'), surface)
}

/// A mapped surface that paints itself in a single fill color.
#[derive(Debug)]
pub struct WindowObject {
    surface: SurfaceId,
    context: ContextId,
    color: Color,
    path: String,
    state: WindowState,
}

impl WindowObject {
    /// Creates and maps a surface with the configured geometry and color.
    ///
    /// The returned object is `Live` but not yet reachable over the bus;
    /// the owner registers [`WindowObject::path`] right after.
    pub fn create(
        display: &mut dyn DisplayServer,
        config: &WindowConfig,
        windows_root: &str,
    ) -> Result<Self> {
        let geometry = Rect::new(config.x, config.y, config.width, config.height);
        let surface = display
            .create_surface(geometry, EventMask::EXPOSURE)
            .context("Failed to create window surface")?;

        let context = match display.create_draw_context(surface, config.fill_color) {
            Ok(context) => context,
            Err(e) => {
                if let Err(cleanup) = display.destroy_surface(surface) {
                    warn!("Failed to release surface {} after error: {:#}", surface, cleanup);
                }
                return Err(e).context("Failed to create drawing context");
            }
        };

        display
            .map_surface(surface)
            .and_then(|_| display.flush())
            .with_context(|| format!("Failed to map surface {}", surface))?;

        let path = window_path(windows_root, surface);
        info!("Window {} created at {}", surface, path);
        Ok(Self {
            surface,
            context,
            color: config.fill_color,
            path,
            state: WindowState::Live,
        })
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            WindowState::Live => Ok(()),
            WindowState::Destroyed => Err(anyhow!("window {} is destroyed", self.surface)),
        }
    }

    /// Repaints exactly `rect` with the current color and flushes.
    pub fn expose(&mut self, display: &mut dyn DisplayServer, rect: Rect) -> Result<()> {
        self.ensure_live()?;
        display.fill_rect(self.surface, self.context, rect)?;
        display.flush()
    }

    /// Switches the fill color and repaints the whole surface.
    ///
    /// The extent is queried every time since the window may have been
    /// resized. If the query fails the new color is kept and the repaint is
    /// left to the next expose.
    pub fn set_color(&mut self, display: &mut dyn DisplayServer, color: Color) -> Result<()> {
        self.ensure_live()?;
        display.set_draw_color(self.context, color)?;
        self.color = color;
        debug!("Window {} color set to {}", self.surface, color);

        match display.query_geometry(self.surface) {
            Ok(size) => {
                display.fill_rect(self.surface, self.context, Rect::covering(size))?;
                display.flush()
            }
            Err(e) => {
                warn!(
                    "Geometry query for window {} failed, skipping repaint: {:#}",
                    self.surface, e
                );
                Ok(())
            }
        }
    }

    /// Releases the drawing context and the surface. The bus path must
    /// already be unregistered. Calling it again is a no-op.
    pub fn destroy(&mut self, display: &mut dyn DisplayServer) -> Result<()> {
        if self.state == WindowState::Destroyed {
            return Ok(());
        }
        self.state = WindowState::Destroyed;
        display.destroy_draw_context(self.context)?;
        display.destroy_surface(self.surface)?;
        display.flush()?;
        info!("Window {} destroyed", self.surface);
        Ok(())
    }

    /// Releases the drawing context only, for a window whose surface id
    /// already belongs to another live window.
    pub fn discard(mut self, display: &mut dyn DisplayServer) -> Result<()> {
        self.state = WindowState::Destroyed;
        display.destroy_draw_context(self.context)?;
        display.flush()
    }
}
