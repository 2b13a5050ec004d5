use super::core::Inner;
use super::io::WatchMode;
use crate::task::TaskId;

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::Location;
use std::rc::Weak;
use std::time::Duration;

/// A weak, cloneable handle to a [`Reactor`](crate::Reactor).
///
/// Callbacks capture a handle to schedule and cancel work from inside
/// the loop; the reactor itself is owned by whoever drives it and is
/// not reachable from callback context.
///
/// A handle never keeps the loop alive. Once the reactor is dropped,
/// every operation degrades to a benign no-op: posts return
/// [`TaskId::NULL`], watches fail to register, cancels report `false`.
pub struct ReactorHandle {
    inner: Weak<RefCell<Inner>>,
}

impl ReactorHandle {
    pub(crate) fn new(inner: Weak<RefCell<Inner>>) -> Self {
        Self { inner }
    }

    /// Whether the reactor behind this handle still exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// See [`Reactor::post_task`](crate::Reactor::post_task).
    ///
    /// Returns [`TaskId::NULL`] if the reactor has been dropped.
    #[track_caller]
    pub fn post_task<F>(&self, callback: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let origin = Location::caller();
        match self.inner.upgrade() {
            Some(inner) => inner
                .borrow_mut()
                .post_delayed(Box::new(callback), Duration::ZERO, origin),
            None => TaskId::NULL,
        }
    }

    /// See [`Reactor::post_delayed_task`](crate::Reactor::post_delayed_task).
    ///
    /// Returns [`TaskId::NULL`] if the reactor has been dropped.
    #[track_caller]
    pub fn post_delayed_task<F>(&self, callback: F, delay: Duration) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let origin = Location::caller();
        match self.inner.upgrade() {
            Some(inner) => inner
                .borrow_mut()
                .post_delayed(Box::new(callback), delay, origin),
            None => TaskId::NULL,
        }
    }

    /// See [`Reactor::watch_file_descriptor`](crate::Reactor::watch_file_descriptor).
    ///
    /// Fails with a registration error if the reactor has been dropped.
    #[track_caller]
    pub fn watch_file_descriptor<F>(
        &self,
        fd: RawFd,
        mode: WatchMode,
        persistent: bool,
        callback: F,
    ) -> io::Result<TaskId>
    where
        F: FnMut() + 'static,
    {
        let origin = Location::caller();
        match self.inner.upgrade() {
            Some(inner) => {
                inner
                    .borrow_mut()
                    .watch_fd(fd, mode, persistent, Box::new(callback), origin)
            }
            None => Err(io::Error::other("reactor is gone")),
        }
    }

    /// See [`Reactor::cancel_task`](crate::Reactor::cancel_task).
    ///
    /// Returns `false` if the reactor has been dropped.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow_mut().cancel(task_id),
            None => false,
        }
    }

    /// See [`Reactor::break_loop`](crate::Reactor::break_loop).
    pub fn break_loop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().break_loop();
        }
    }
}

impl Clone for ReactorHandle {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
