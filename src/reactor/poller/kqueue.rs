//! macOS `kqueue`-based poller implementation.
//!
//! Functionally equivalent to the Linux `epoll` poller and exposes the
//! same interface to the reactor.
//!
//! kqueue keeps one registration per (fd, filter) pair, so read and
//! write interests map to separate `EVFILT_READ`/`EVFILT_WRITE`
//! filters, and readiness for both arrives as separate kevents that are
//! merged back into a single [`Event`] per descriptor.
//!
//! This backend is selected automatically on macOS targets.

use super::common::Interest;
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_DELETE, EV_ENABLE, EV_EOF, EVFILT_READ, EVFILT_WRITE, kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// macOS `kqueue` poller.
///
/// Owns the kqueue instance and a reusable kevent buffer.
pub(crate) struct KqueuePoller {
    /// Kqueue file descriptor.
    kqueue: RawFd,

    /// Reusable buffer for returned kevents.
    events: Vec<kevent>,
}

impl KqueuePoller {
    /// Creates a new `KqueuePoller` with room for `capacity` kevents
    /// per wait call.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kqueue = unsafe { kqueue() };
        if kqueue < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            kqueue,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if interest.read {
            self.add_filter(fd, token, EVFILT_READ)?;
        }
        if interest.write {
            self.add_filter(fd, token, EVFILT_WRITE)?;
        }

        Ok(())
    }

    /// Updates interest flags for an already registered descriptor.
    ///
    /// Filters no longer wanted are deleted; deleting a filter that was
    /// never armed is not an error.
    pub(crate) fn reregister(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        if interest.read {
            self.add_filter(fd, token, EVFILT_READ)?;
        } else {
            self.delete_filter(fd, EVFILT_READ);
        }

        if interest.write {
            self.add_filter(fd, token, EVFILT_WRITE)?;
        } else {
            self.delete_filter(fd, EVFILT_WRITE);
        }

        Ok(())
    }

    /// Removes a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        self.delete_filter(fd, EVFILT_READ);
        self.delete_filter(fd, EVFILT_WRITE);
    }

    /// Polls for I/O readiness events.
    ///
    /// Blocks until at least one filter fires or the optional timeout
    /// expires. A timeout of `None` blocks indefinitely. An interrupted
    /// wait returns `Ok` with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let ts = timeout.map(timeout_to_timespec);
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const timespec)
            .unwrap_or(ptr::null());

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
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
            let token = ev.udata as usize;
            let eof = ev.flags & EV_EOF != 0;
            let readable = ev.filter == EVFILT_READ || eof;
            let writable = ev.filter == EVFILT_WRITE;

            // Read and write readiness arrive as separate kevents for
            // the same descriptor; fold them into one Event.
            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }

    fn add_filter(&self, fd: RawFd, token: usize, filter: i16) -> io::Result<()> {
        let change = kevent {
            ident: fd as usize,
            filter,
            flags: EV_ADD | EV_ENABLE,
            fflags: 0,
            data: 0,
            udata: token as *mut _,
        };

        let rc = unsafe { kevent(self.kqueue, &change, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn delete_filter(&self, fd: RawFd, filter: i16) {
        let change = kevent {
            ident: fd as usize,
            filter,
            flags: EV_DELETE,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };

        unsafe {
            kevent(self.kqueue, &change, 1, ptr::null_mut(), 0, ptr::null());
        }
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqueue);
        }
    }
}

fn timeout_to_timespec(timeout: Duration) -> timespec {
    timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}
