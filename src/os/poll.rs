// src/os/poll.rs

//! A `poll(2)` wait-set rebuilt from scratch on every loop iteration.
//!
//! Entry 0 is always the display connection. Entries `1..` are the bus
//! watches in registry order. The set is never reused across iterations:
//! the bus may add or remove watches while we dispatch, and the next wait
//! must see exactly the registry as it is then.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::trace;
use nix::errno::Errno;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::FatalError;
use crate::watch::{Watch, WatchFlags, WatchId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollFlags: libc::c_short {
        const POLLIN = libc::POLLIN;
        const POLLPRI = libc::POLLPRI;
        const POLLOUT = libc::POLLOUT;
        const POLLERR = libc::POLLERR;
        const POLLHUP = libc::POLLHUP;
        const POLLNVAL = libc::POLLNVAL;
    }
}

/// Index of the display connection in every wait-set.
pub const DISPLAY_INDEX: usize = 0;

fn new_pollfd(fd: RawFd, interest: PollFlags) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: interest.bits(),
        revents: 0,
    }
}

/// One iteration's wait-set and, after `wait`, its readiness results.
#[derive(Debug)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
    /// `watches[i]` owns `fds[i + 1]`.
    watches: Vec<WatchId>,
}

impl PollSet {
    /// Builds the wait-set `{display} ∪ watches`.
    ///
    /// Disabled watches keep their slot with a negative descriptor, which
    /// `poll(2)` skips, so entry positions always match `watches`.
    pub fn build(display_fd: RawFd, watches: &[Watch]) -> Self {
        let mut fds = Vec::with_capacity(1 + watches.len());
        fds.push(new_pollfd(display_fd, PollFlags::POLLIN));
        fds.extend(watches.iter().map(|watch| {
            if watch.enabled {
                new_pollfd(watch.fd, watch.interest.to_poll_interest())
            } else {
                new_pollfd(-1, PollFlags::empty())
            }
        }));
        let set = Self {
            fds,
            watches: watches.iter().map(|w| w.id).collect(),
        };
        trace!("PollSet built with {} entries", set.fds.len());
        set
    }

    /// Blocks until at least one entry is ready or `timeout` expires.
    /// `None` waits forever. Signal interruptions are retried.
    ///
    /// Returns the number of ready entries.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        for entry in &mut self.fds {
            entry.revents = 0;
        }

        loop {
            trace!(
                "PollSet: waiting on {} entries with timeout {}ms",
                self.fds.len(),
                timeout_ms
            );
            // SAFETY: `fds` is a live, correctly sized buffer of pollfd structs.
            let ready = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if ready >= 0 {
                trace!("PollSet: {} entries ready", ready);
                return Ok(ready as usize);
            }
            let errno = Errno::last();
            if errno == Errno::EINTR {
                trace!("PollSet: poll interrupted (EINTR), retrying.");
                continue;
            }
            return Err(io::Error::from(errno)).context(FatalError::Wait);
        }
    }

    /// Number of entries, always `1 + watches`.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Readiness observed on the display connection.
    pub fn display_readiness(&self) -> PollFlags {
        PollFlags::from_bits_truncate(self.fds[DISPLAY_INDEX].revents)
    }

    /// Watches with non-empty readiness, in submission order, with the raw
    /// readiness translated into the bus vocabulary.
    pub fn ready_watches(&self) -> impl Iterator<Item = (WatchId, WatchFlags)> + '_ {
        self.watches
            .iter()
            .zip(&self.fds[DISPLAY_INDEX + 1..])
            .filter(|(_, entry)| entry.revents != 0)
            .map(|(id, entry)| {
                let revents = PollFlags::from_bits_truncate(entry.revents);
                (*id, WatchFlags::from_poll_readiness(revents))
            })
    }

    /// Descriptors as submitted, entry 0 first.
    pub fn descriptors(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.fds.iter().map(|entry| entry.fd)
    }

    /// Watch identities as submitted, in entry order.
    pub fn watch_ids(&self) -> &[WatchId] {
        &self.watches
    }

    /// Overrides the observed readiness of one entry.
    #[cfg(test)]
    pub fn set_readiness(&mut self, index: usize, revents: PollFlags) {
        self.fds[index].revents = revents.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use test_log::test;

    fn watch(id: usize, fd: RawFd, interest: WatchFlags) -> Watch {
        Watch::new(WatchId::new(id), fd, interest)
    }

    #[test]
    fn display_is_always_entry_zero() {
        let set = PollSet::build(7, &[watch(1, 8, WatchFlags::READABLE)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.descriptors().collect::<Vec<_>>(), vec![7, 8]);
        assert_eq!(set.fds[0].events, libc::POLLIN);
    }

    #[test]
    fn interest_follows_the_watch_request() {
        let set = PollSet::build(
            3,
            &[
                watch(1, 4, WatchFlags::READABLE),
                watch(2, 4, WatchFlags::WRITABLE),
                watch(3, 5, WatchFlags::READABLE | WatchFlags::WRITABLE),
            ],
        );
        assert_eq!(set.fds[1].events, libc::POLLIN);
        assert_eq!(set.fds[2].events, libc::POLLOUT);
        assert_eq!(set.fds[3].events, libc::POLLIN | libc::POLLOUT);
    }

    #[test]
    fn disabled_watches_keep_their_slot() {
        let mut disabled = watch(2, 9, WatchFlags::WRITABLE);
        disabled.enabled = false;
        let set = PollSet::build(3, &[watch(1, 8, WatchFlags::READABLE), disabled, watch(3, 10, WatchFlags::READABLE)]);
        assert_eq!(set.descriptors().collect::<Vec<_>>(), vec![3, 8, -1, 10]);
        assert_eq!(set.watch_ids(), &[WatchId::new(1), WatchId::new(2), WatchId::new(3)]);
    }

    #[test]
    fn wait_reports_readiness_per_entry() -> Result<()> {
        let (display_peer, display_end) = UnixStream::pair()?;
        let (mut bus_peer, bus_end) = UnixStream::pair()?;
        let (_idle_peer, idle_end) = UnixStream::pair()?;
        bus_peer.write_all(b"x")?;

        let mut set = PollSet::build(
            display_end.as_raw_fd(),
            &[
                watch(1, idle_end.as_raw_fd(), WatchFlags::READABLE),
                watch(2, bus_end.as_raw_fd(), WatchFlags::READABLE),
            ],
        );
        let ready = set.wait(Some(Duration::from_millis(1000)))?;
        assert_eq!(ready, 1);
        assert!(set.display_readiness().is_empty());
        let ready: Vec<_> = set.ready_watches().collect();
        assert_eq!(ready, vec![(WatchId::new(2), WatchFlags::READABLE)]);
        drop(display_peer);
        Ok(())
    }

    #[test]
    fn wait_times_out_with_nothing_ready() -> Result<()> {
        let (_peer, end) = UnixStream::pair()?;
        let mut set = PollSet::build(end.as_raw_fd(), &[]);
        assert_eq!(set.wait(Some(Duration::from_millis(10)))?, 0);
        assert!(set.display_readiness().is_empty());
        Ok(())
    }

    #[test]
    fn hangup_is_reported_to_the_watch() -> Result<()> {
        let (display_peer, display_end) = UnixStream::pair()?;
        let (bus_peer, bus_end) = UnixStream::pair()?;
        drop(bus_peer);
        let mut set = PollSet::build(
            display_end.as_raw_fd(),
            &[watch(1, bus_end.as_raw_fd(), WatchFlags::READABLE)],
        );
        set.wait(Some(Duration::from_millis(1000)))?;
        let (id, flags) = set.ready_watches().next().unwrap();
        assert_eq!(id, WatchId::new(1));
        assert!(flags.contains(WatchFlags::HANGUP));
        drop(display_peer);
        Ok(())
    }

    #[test]
    fn display_readiness_is_reported() -> Result<()> {
        let (mut display_peer, display_end) = UnixStream::pair()?;
        display_peer.write_all(b"e")?;
        let mut set = PollSet::build(display_end.as_raw_fd(), &[]);
        set.wait(None)?;
        assert!(set.display_readiness().contains(PollFlags::POLLIN));
        assert_eq!(set.ready_watches().count(), 0);
        Ok(())
    }
}
