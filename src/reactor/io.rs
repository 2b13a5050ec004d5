use super::poller::common::Interest;

use std::os::unix::io::RawFd;
use std::panic::Location;

/// Readiness condition a file-descriptor watch waits for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WatchMode {
    /// Dispatch when the descriptor becomes readable.
    Read,

    /// Dispatch when the descriptor becomes writable.
    Write,

    /// Dispatch when the descriptor becomes readable or writable.
    ReadWrite,
}

impl WatchMode {
    pub(crate) fn reads(self) -> bool {
        matches!(self, WatchMode::Read | WatchMode::ReadWrite)
    }

    pub(crate) fn writes(self) -> bool {
        matches!(self, WatchMode::Write | WatchMode::ReadWrite)
    }

    pub(crate) fn interest(self) -> Interest {
        Interest {
            read: self.reads(),
            write: self.writes(),
        }
    }
}

/// Dispatch state of one watch entry.
///
/// Readiness never invokes the user callback from the OS event itself;
/// it posts a same-loop follow-up dispatch instead. This tri-state
/// tracks the entry across that asynchronous boundary so that
/// cancellation and loop teardown can neutralize a dispatch that is
/// already in flight.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WatchState {
    /// No dispatch in flight. The entry is armed when `watching` is set.
    Idle,

    /// Readiness observed and a follow-up dispatch posted but not yet
    /// run. The OS registration is disarmed for the duration.
    Notified,

    /// Canceled while a follow-up dispatch was pending. The callback is
    /// already released; the pending dispatch destroys the entry and
    /// runs nothing.
    Draining,
}

/// One file-descriptor watch, keyed by its [`TaskId`](crate::TaskId) in
/// the reactor's watch registry.
///
/// Several entries may watch the same descriptor, each under its own
/// id; the reactor arms the OS with the union of their interests.
pub(crate) struct WatchEntry {
    /// The watched file descriptor. Not owned: the caller keeps it open
    /// for the lifetime of the watch.
    pub(crate) fd: RawFd,

    /// Readiness condition this entry waits for.
    pub(crate) mode: WatchMode,

    /// Whether the watch survives after firing. One-shot entries are
    /// removed right before their single dispatch.
    pub(crate) persistent: bool,

    /// The user callback. `None` while the callback is being run (it is
    /// taken out for the call) or once the entry is draining.
    pub(crate) callback: Option<Box<dyn FnMut()>>,

    /// Whether the OS-level registration is currently armed for this
    /// entry.
    pub(crate) watching: bool,

    /// Dispatch state across the readiness-to-callback boundary.
    pub(crate) state: WatchState,

    /// Call site that created the watch, for diagnostics.
    pub(crate) origin: &'static Location<'static>,
}

impl WatchEntry {
    /// Readiness bits this entry currently asks of the OS.
    ///
    /// Empty while disarmed, so a `Notified` or `Draining` entry does
    /// not keep its descriptor registered.
    pub(crate) fn armed_interest(&self) -> Interest {
        if self.watching {
            self.mode.interest()
        } else {
            Interest::EMPTY
        }
    }

    /// Whether a reported readiness matches this entry's mode.
    pub(crate) fn wants(&self, readable: bool, writable: bool) -> bool {
        (readable && self.mode.reads()) || (writable && self.mode.writes())
    }
}
