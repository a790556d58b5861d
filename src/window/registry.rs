// src/window/registry.rs

//! The live windows, keyed by surface id for display-event routing.

use std::collections::BTreeMap;

use log::warn;

use super::WindowObject;
use crate::display::SurfaceId;

/// Owns every live [`WindowObject`].
///
/// The bus dispatch table refers to windows by [`SurfaceId`] only; this is
/// the single owner.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: BTreeMap<SurfaceId, WindowObject>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `window`. Returns `false` if its surface is already
    /// registered; `window` is then dropped without touching the display.
    pub fn insert(&mut self, window: WindowObject) -> bool {
        let surface = window.surface();
        if self.windows.contains_key(&surface) {
            warn!("Window {} is already registered", surface);
            return false;
        }
        self.windows.insert(surface, window);
        true
    }

    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.windows.contains_key(&surface)
    }

    pub fn remove(&mut self, surface: SurfaceId) -> Option<WindowObject> {
        self.windows.remove(&surface)
    }

    pub fn get(&self, surface: SurfaceId) -> Option<&WindowObject> {
        self.windows.get(&surface)
    }

    pub fn get_mut(&mut self, surface: SurfaceId) -> Option<&mut WindowObject> {
        self.windows.get_mut(&surface)
    }

    /// Surface ids in ascending order.
    pub fn surfaces(&self) -> Vec<SurfaceId> {
        self.windows.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowObject> {
        self.windows.values()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
