//! Linux `epoll`-based poller implementation.
//!
//! This module provides the Linux backend for the reactor. It is
//! functionally equivalent to the macOS `kqueue` poller and exposes the
//! same interface.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness, bounded by the next timer deadline
//! - Report readiness as [`Event`]s keyed by the registration token
//!
//! This backend is selected automatically on Linux targets.

use super::common::Interest;
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Linux `epoll` poller.
///
/// Owns the `epoll` instance and a reusable event buffer. Descriptors
/// are registered with their fd as the token; epoll reports at most one
/// event per descriptor, so no merging is needed on this backend.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Creates a new `EpollPoller` with room for `capacity` events per
    /// wait call.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Updates interest flags for an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Removes a file descriptor from the poller.
    ///
    /// Errors are ignored: the descriptor may already have been closed
    /// by its owner, which removes it from epoll implicitly.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Polls for I/O readiness events.
    ///
    /// Blocks until at least one file descriptor becomes ready or the
    /// optional timeout expires. A timeout of `None` blocks
    /// indefinitely. An interrupted wait returns `Ok` with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let timeout_ms = timeout.map(timeout_to_ms).unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            unsafe {
                self.events.set_len(0);
            }

            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR | EPOLLHUP) as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable,
                writable,
            });
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

/// Converts a timeout to whole milliseconds, rounding up.
///
/// Rounding down would wake the loop just before a timer deadline and
/// force an extra near-zero wait.
fn timeout_to_ms(timeout: Duration) -> i32 {
    let ms = timeout.as_millis();
    let ms = if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms + 1
    } else {
        ms
    };

    ms.min(i32::MAX as u128) as i32
}
