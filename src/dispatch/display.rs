// src/dispatch/display.rs

use anyhow::{anyhow, Context, Result};
use log::{debug, error, trace, warn};

use crate::display::{DisplayEvent, DisplayServer};
use crate::error::FatalError;
use crate::window::WindowRegistry;

/// What one drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    /// Expose events delivered to a live window.
    pub exposed: usize,
    /// Expose events for surfaces with no live window.
    pub ignored: usize,
    /// Events with an unrecognized code.
    pub unknown: usize,
}

impl DrainStats {
    pub fn total(&self) -> usize {
        self.exposed + self.ignored + self.unknown
    }
}

pub struct DisplayEventDispatcher;

impl DisplayEventDispatcher {
    /// Takes every queued event off the display connection and routes it.
    ///
    /// Readiness is level-triggered and one wake-up may stand for many
    /// events, so this keeps polling until the queue is empty. An error
    /// notification or a failed connection ends the drain with a
    /// [`FatalError`]; events still queued behind it are left untouched.
    pub fn drain(
        display: &mut dyn DisplayServer,
        windows: &mut WindowRegistry,
    ) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        loop {
            let Some(event) = display.poll_event() else {
                if display.has_error() {
                    error!("Display connection failed while draining events");
                    return Err(anyhow!(FatalError::DisplayIo));
                }
                trace!("Display queue drained: {:?}", stats);
                return Ok(stats);
            };

            match event {
                DisplayEvent::Error { code, resource } => {
                    error!(
                        "Display protocol error {} on resource {:#x}",
                        code, resource
                    );
                    return Err(anyhow!(FatalError::ProtocolError { code, resource }));
                }
                DisplayEvent::Expose { surface, rect } => match windows.get_mut(surface) {
                    Some(window) => {
                        trace!("Expose {:?} on window {}", rect, surface);
                        window
                            .expose(display, rect)
                            .with_context(|| format!("Failed to repaint window {}", surface))?;
                        stats.exposed += 1;
                    }
                    None => {
                        debug!("Expose for unknown surface {}; ignoring", surface);
                        stats.ignored += 1;
                    }
                },
                DisplayEvent::Unknown { code } => {
                    warn!("Ignoring unrecognized display event code {}", code);
                    stats.unknown += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::config::WindowConfig;
    use crate::display::mock::MockDisplay;
    use crate::display::{Rect, SurfaceId};
    use crate::error::fatal_kind;
    use crate::window::WindowObject;
    use test_log::test;

    fn setup(count: usize) -> (MockDisplay, WindowRegistry, Vec<SurfaceId>) {
        let mut display = MockDisplay::new();
        let mut windows = WindowRegistry::new();
        for _ in 0..count {
            let window = WindowObject::create(&mut display, &WindowConfig::default(), "/w").unwrap();
            windows.insert(window);
        }
        display.clear_ops();
        let surfaces = windows.surfaces();
        (display, windows, surfaces)
    }

    #[test]
    fn expose_reaches_only_the_target_window() {
        let (mut display, mut windows, surfaces) = setup(3);
        let rect = Rect::new(5, 6, 7, 8);
        display.push_event(DisplayEvent::Expose { surface: surfaces[1], rect });

        let stats = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap();

        assert_eq!(stats.exposed, 1);
        assert!(display.fills(surfaces[0]).is_empty());
        assert_eq!(display.fills(surfaces[1]), vec![(rect, Color::WHITE)]);
        assert!(display.fills(surfaces[2]).is_empty());
    }

    #[test]
    fn expose_for_an_unknown_surface_is_ignored() {
        let (mut display, mut windows, _) = setup(1);
        display.push_event(DisplayEvent::Expose {
            surface: SurfaceId(0xdead),
            rect: Rect::new(0, 0, 1, 1),
        });

        let stats = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap();

        assert_eq!(stats.ignored, 1);
        assert!(display.ops.is_empty());
    }

    #[test]
    fn one_drain_takes_every_queued_event() {
        let (mut display, mut windows, surfaces) = setup(2);
        display.push_event(DisplayEvent::Expose { surface: surfaces[0], rect: Rect::new(0, 0, 1, 1) });
        display.push_event(DisplayEvent::Unknown { code: 33 });
        display.push_event(DisplayEvent::Expose { surface: surfaces[1], rect: Rect::new(1, 1, 2, 2) });

        let stats = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap();

        assert_eq!(stats, DrainStats { exposed: 2, ignored: 0, unknown: 1 });
        assert!(display.events.is_empty());
    }

    #[test]
    fn protocol_error_is_fatal_and_stops_the_drain() {
        let (mut display, mut windows, surfaces) = setup(1);
        display.push_event(DisplayEvent::Error { code: 3, resource: 0x42 });
        display.push_event(DisplayEvent::Expose { surface: surfaces[0], rect: Rect::new(0, 0, 1, 1) });

        let err = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap_err();

        assert_eq!(
            fatal_kind(&err),
            Some(&FatalError::ProtocolError { code: 3, resource: 0x42 })
        );
        assert!(display.ops.is_empty());
        assert_eq!(display.events.len(), 1);
    }

    #[test]
    fn empty_queue_with_a_failed_connection_is_fatal() {
        let (mut display, mut windows, _) = setup(0);
        display.io_error = true;

        let err = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap_err();
        assert_eq!(fatal_kind(&err), Some(&FatalError::DisplayIo));
    }

    #[test]
    fn empty_queue_on_a_healthy_connection_is_not_an_error() {
        let (mut display, mut windows, _) = setup(1);
        let stats = DisplayEventDispatcher::drain(&mut display, &mut windows).unwrap();
        assert_eq!(stats.total(), 0);
    }
}
