// src/watch.rs

//! Tracks the descriptors the message bus wants readiness notifications for.
//!
//! The bus library owns its watch objects and tells us about them through
//! add/remove/toggle callbacks, which can fire from inside any bus call. The
//! registry only records membership; it never closes a descriptor or frees
//! a watch.

use bitflags::bitflags;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::os::poll::PollFlags;

bitflags! {
    /// Readiness vocabulary shared with the bus library.
    ///
    /// The bit values are the ones the bus library uses for both requested
    /// interest and reported readiness, so they pass through unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchFlags: u32 {
        const READABLE = 1;
        const WRITABLE = 2;
        const ERROR = 4;
        const HANGUP = 8;
    }
}

impl WatchFlags {
    /// Interest to submit to `poll(2)` for a watch that requested `self`.
    pub fn to_poll_interest(self) -> PollFlags {
        let mut interest = PollFlags::empty();
        if self.contains(WatchFlags::READABLE) {
            interest |= PollFlags::POLLIN;
        }
        if self.contains(WatchFlags::WRITABLE) {
            interest |= PollFlags::POLLOUT;
        }
        interest
    }

    /// Translates readiness observed by `poll(2)` back into the bus vocabulary.
    ///
    /// Error and hangup are reported even though they are never requested;
    /// the bus needs them to notice a dead connection.
    pub fn from_poll_readiness(revents: PollFlags) -> Self {
        let mut flags = WatchFlags::empty();
        if revents.contains(PollFlags::POLLIN) {
            flags |= WatchFlags::READABLE;
        }
        if revents.contains(PollFlags::POLLOUT) {
            flags |= WatchFlags::WRITABLE;
        }
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            flags |= WatchFlags::ERROR;
        }
        if revents.contains(PollFlags::POLLHUP) {
            flags |= WatchFlags::HANGUP;
        }
        flags
    }
}

/// Identity of a watch, as handed out by the bus collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(usize);

impl WatchId {
    pub const fn new(raw: usize) -> Self {
        WatchId(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// One readiness request from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    pub id: WatchId,
    pub fd: RawFd,
    pub interest: WatchFlags,
    /// Disabled watches stay registered but are not polled.
    pub enabled: bool,
}

impl Watch {
    pub fn new(id: WatchId, fd: RawFd, interest: WatchFlags) -> Self {
        Watch {
            id,
            fd,
            interest,
            enabled: true,
        }
    }
}

/// Ordered set of the watches currently requested by the bus.
///
/// Order is insertion order. Removal shifts the tail down so the relative
/// order of survivors never changes.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: Vec<Watch>,
}

/// The registry is reached both from the loop and from bus callbacks that
/// fire on the loop thread, hence shared single-threaded ownership.
pub type SharedWatchRegistry = Rc<RefCell<WatchRegistry>>;

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWatchRegistry {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Registers `watch`. Returns `false` without inserting if the same
    /// watch, or another watch on the same descriptor with the same
    /// interest, is already present.
    ///
    /// Called from inside bus callbacks: no I/O, no blocking.
    pub fn add(&mut self, watch: Watch) -> bool {
        if let Some(existing) = self
            .watches
            .iter()
            .find(|w| w.id == watch.id || (w.fd == watch.fd && w.interest == watch.interest))
        {
            warn!(
                "Refusing duplicate watch {:?} (fd {}, {:?}); already registered as {:?}",
                watch.id, watch.fd, watch.interest, existing.id
            );
            return false;
        }
        debug!(
            "Watch added: {:?} fd {} interest {:?} enabled {}",
            watch.id, watch.fd, watch.interest, watch.enabled
        );
        self.watches.push(watch);
        true
    }

    /// Removes the watch with identity `id`, keeping the order of the rest.
    ///
    /// Returns `None` (and changes nothing) if it was never added.
    pub fn remove(&mut self, id: WatchId) -> Option<Watch> {
        let Some(index) = self.watches.iter().position(|w| w.id == id) else {
            warn!("Asked to remove unknown watch {:?}; ignoring.", id);
            return None;
        };
        let removed = self.watches.remove(index);
        self.watches.shrink_to_fit();
        debug!("Watch removed: {:?} fd {}", removed.id, removed.fd);
        Some(removed)
    }

    /// Updates the enabled state and interest of a registered watch in place.
    pub fn toggle(&mut self, id: WatchId, enabled: bool, interest: WatchFlags) -> bool {
        match self.watches.iter_mut().find(|w| w.id == id) {
            Some(watch) => {
                trace!("Watch {:?} toggled: enabled {} interest {:?}", id, enabled, interest);
                watch.enabled = enabled;
                watch.interest = interest;
                true
            }
            None => {
                warn!("Asked to toggle unknown watch {:?}; ignoring.", id);
                false
            }
        }
    }

    pub fn contains(&self, id: WatchId) -> bool {
        self.watches.iter().any(|w| w.id == id)
    }

    pub fn get(&self, id: WatchId) -> Option<&Watch> {
        self.watches.iter().find(|w| w.id == id)
    }

    /// Copy of the current membership, in registry order.
    pub fn snapshot(&self) -> Vec<Watch> {
        self.watches.clone()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn watch(id: usize, fd: RawFd) -> Watch {
        Watch::new(WatchId::new(id), fd, WatchFlags::READABLE)
    }

    fn ids(registry: &WatchRegistry) -> Vec<usize> {
        registry.snapshot().iter().map(|w| w.id.raw()).collect()
    }

    #[test]
    fn adding_the_same_watch_twice_fails_the_second_time() {
        let mut registry = WatchRegistry::new();
        assert!(registry.add(watch(1, 10)));
        assert!(!registry.add(watch(1, 10)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_descriptor_with_same_interest_is_a_duplicate() {
        let mut registry = WatchRegistry::new();
        assert!(registry.add(watch(1, 10)));
        assert!(!registry.add(watch(2, 10)));
        assert_eq!(ids(&registry), vec![1]);
    }

    #[test]
    fn same_descriptor_with_different_interest_is_allowed() {
        let mut registry = WatchRegistry::new();
        assert!(registry.add(Watch::new(WatchId::new(1), 10, WatchFlags::READABLE)));
        assert!(registry.add(Watch::new(WatchId::new(2), 10, WatchFlags::WRITABLE)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removal_preserves_the_order_of_the_rest() {
        let mut registry = WatchRegistry::new();
        for (id, fd) in [(1, 10), (2, 11), (3, 12)] {
            registry.add(watch(id, fd));
        }
        let removed = registry.remove(WatchId::new(2)).unwrap();
        assert_eq!(removed.fd, 11);
        assert_eq!(ids(&registry), vec![1, 3]);
    }

    #[test]
    fn removing_an_unknown_watch_changes_nothing() {
        let mut registry = WatchRegistry::new();
        registry.add(watch(1, 10));
        assert!(registry.remove(WatchId::new(9)).is_none());
        assert_eq!(ids(&registry), vec![1]);
    }

    #[test]
    fn toggle_updates_in_place() {
        let mut registry = WatchRegistry::new();
        registry.add(watch(1, 10));
        registry.add(watch(2, 11));
        assert!(registry.toggle(WatchId::new(1), false, WatchFlags::WRITABLE));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].id, WatchId::new(1));
        assert!(!snapshot[0].enabled);
        assert_eq!(snapshot[0].interest, WatchFlags::WRITABLE);
        assert!(!registry.toggle(WatchId::new(7), true, WatchFlags::READABLE));
    }

    #[test]
    fn snapshot_reflects_state_at_call_time() {
        let mut registry = WatchRegistry::new();
        registry.add(watch(1, 10));
        let before = registry.snapshot();
        registry.add(watch(2, 11));
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn readiness_flags_round_trip_through_poll_vocabulary() {
        let all = WatchFlags::READABLE | WatchFlags::WRITABLE | WatchFlags::ERROR | WatchFlags::HANGUP;
        let revents = PollFlags::POLLIN | PollFlags::POLLOUT | PollFlags::POLLERR | PollFlags::POLLHUP;
        assert_eq!(WatchFlags::from_poll_readiness(revents), all);

        for single in [WatchFlags::READABLE, WatchFlags::WRITABLE] {
            let interest = single.to_poll_interest();
            assert_eq!(WatchFlags::from_poll_readiness(interest), single);
        }
        assert_eq!(WatchFlags::from_poll_readiness(PollFlags::POLLNVAL), WatchFlags::ERROR);
        assert!(WatchFlags::from_poll_readiness(PollFlags::empty()).is_empty());
    }
}
