use super::event::Event;
use super::handle::ReactorHandle;
use super::io::{WatchEntry, WatchMode, WatchState};
use super::poller::Poller;
use super::poller::common::Interest;
use super::timer::{DelayedTask, TimerRecord};
use crate::builder::ReactorBuilder;
use crate::task::{TaskId, TaskIdAllocator};

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::panic::Location;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Run-control state of the loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RunState {
    /// Not being driven.
    Idle,

    /// Inside [`Reactor::run`].
    Running,

    /// Inside a [`Reactor::run_once`] iteration.
    RunningOnce,

    /// A break was honored; transient until the driver returns.
    Stopped,
}

/// A single-threaded callback event loop.
///
/// The reactor multiplexes two kinds of deferred work onto one OS
/// poller: time-delayed callbacks and file-descriptor readiness
/// callbacks. Both are identified by a [`TaskId`] drawn from one
/// monotone allocator, and both are canceled through the same
/// [`cancel_task`](Reactor::cancel_task) entry point, including tasks
/// whose underlying timer record cannot be unarmed once scheduled.
///
/// Exactly one logical thread owns the reactor; every callback runs on
/// that thread, serialized by the run loop, and never concurrently with
/// registry mutation. Callbacks that need to post, watch, or cancel
/// from inside the loop capture a [`ReactorHandle`].
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// let mut reactor = Reactor::new()?;
/// let quit = reactor.quit_closure();
///
/// reactor.post_delayed_task(move || quit(), Duration::from_millis(10));
/// reactor.run();
/// ```
pub struct Reactor {
    inner: Rc<RefCell<Inner>>,
}

impl Reactor {
    /// Creates a reactor with default configuration.
    ///
    /// Fails if the OS poller cannot be created (descriptor
    /// exhaustion).
    pub fn new() -> io::Result<Self> {
        ReactorBuilder::new().build()
    }

    pub(crate) fn from_poller(poller: Poller) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::new(poller))),
        }
    }

    /// Returns a weak, cloneable handle to this loop.
    ///
    /// The handle is the way for callbacks to post, watch, and cancel
    /// work from inside the loop; it never keeps the loop alive.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle::new(Rc::downgrade(&self.inner))
    }

    /// Schedules `callback` to run the next time the loop is idle.
    ///
    /// Equivalent to [`post_delayed_task`](Self::post_delayed_task)
    /// with a zero delay. Never fails synchronously.
    #[track_caller]
    pub fn post_task<F>(&self, callback: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let origin = Location::caller();
        self.inner
            .borrow_mut()
            .post_delayed(Box::new(callback), Duration::ZERO, origin)
    }

    /// Schedules `callback` to run once `delay` has elapsed.
    ///
    /// Returns the task's id; never fails synchronously. Among delayed
    /// tasks, earlier deadlines run first and equal deadlines run in
    /// posting order.
    #[track_caller]
    pub fn post_delayed_task<F>(&self, callback: F, delay: Duration) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let origin = Location::caller();
        self.inner
            .borrow_mut()
            .post_delayed(Box::new(callback), delay, origin)
    }

    /// Watches `fd` for readiness and runs `callback` when it fires.
    ///
    /// The descriptor must be open and stay open for the lifetime of
    /// the watch; the reactor never closes it. A persistent watch
    /// re-arms after every dispatch until canceled; a one-shot watch is
    /// removed right before its single dispatch.
    ///
    /// Registration failure (invalid descriptor, resource limits) is
    /// reported synchronously; the watch was not installed.
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
        self.inner
            .borrow_mut()
            .watch_fd(fd, mode, persistent, Box::new(callback), origin)
    }

    /// Cancels the delayed task or descriptor watch identified by
    /// `task_id`.
    ///
    /// Returns whether the task was actually canceled; `false` for an
    /// unknown id or one that already fired. Once `cancel_task`
    /// returns `true`, the task's callback will never run: if an
    /// already-armed timer record for it fires later, that fire is
    /// discarded.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        self.inner.borrow_mut().cancel(task_id)
    }

    /// Requests loop termination.
    ///
    /// Idempotent, and safe to call from within a callback: dispatch
    /// stops after the currently-running callback and whatever remains
    /// due stays pending for the next run. A no-op while the loop is
    /// not running.
    pub fn break_loop(&self) {
        self.inner.borrow_mut().break_loop();
    }

    /// Returns a closure that requests loop termination when invoked.
    ///
    /// Invoking it while the loop is not running, or after the
    /// reactor has been dropped, is a no-op.
    pub fn quit_closure(&self) -> impl Fn() + 'static {
        let inner = Rc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                inner.borrow_mut().break_loop();
            }
        }
    }

    /// Pumps the loop until [`break_loop`](Self::break_loop) is
    /// invoked.
    ///
    /// Blocks on the poller between dispatches, waiting for the next
    /// timer deadline or descriptor readiness.
    pub fn run(&mut self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.run_state = RunState::Running;
            inner.quit_requested = false;
        }
        debug!("run loop entered");

        loop {
            self.turn(true, true);

            let mut inner = self.inner.borrow_mut();
            if inner.quit_requested {
                inner.run_state = RunState::Stopped;
                break;
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.quit_requested = false;
        inner.run_state = RunState::Idle;
        debug!("run loop stopped");
    }

    /// Performs a single iteration of waiting and dispatching.
    ///
    /// Blocks only if `may_block` is `true` and at least one delayed
    /// task or watch is outstanding. Returns whether any unit of work
    /// remains pending after the iteration, so a caller can decide
    /// whether to call again.
    pub fn run_once(&mut self, may_block: bool) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            inner.run_state = RunState::RunningOnce;
            inner.quit_requested = false;
        }

        let remaining = self.turn(may_block, false);

        let mut inner = self.inner.borrow_mut();
        inner.quit_requested = false;
        inner.run_state = RunState::Idle;

        remaining
    }

    /// One wait-and-dispatch cycle.
    ///
    /// No registry borrow is held while a callback runs, so callbacks
    /// are free to post, watch, and cancel through a handle.
    fn turn(&self, may_block: bool, block_when_idle: bool) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            let timeout = inner.wait_timeout(may_block, block_when_idle);

            let inner = &mut *inner;
            if let Err(err) = inner.poller.poll(&mut inner.events, timeout) {
                debug!(error = %err, "poller wait failed");
            }

            inner.process_events();
        }

        // Due delayed tasks, earliest deadline first. The deadline cut
        // is taken once so a callback posting a zero-delay task cannot
        // extend the current iteration.
        let now = Instant::now();
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                if inner.quit_requested {
                    break;
                }
                inner.take_due_task(now)
            };

            let Some((task_id, task)) = due else {
                break;
            };

            trace!(task_id = %task_id, origin = %task.origin, "running delayed task");
            (task.callback)();
        }

        // Follow-up dispatches posted for ready descriptors.
        loop {
            let dispatch = {
                let mut inner = self.inner.borrow_mut();
                if inner.quit_requested {
                    break;
                }
                inner.take_ready_dispatch()
            };

            let Some(mut dispatch) = dispatch else {
                break;
            };

            trace!(task_id = %dispatch.task_id, "running descriptor watch callback");
            (dispatch.callback)();

            if dispatch.reinstall {
                self.inner
                    .borrow_mut()
                    .restore_callback(dispatch.task_id, dispatch.callback);
            }
        }

        self.inner.borrow().work_remaining()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let inner = self.inner.borrow();
        if !inner.posted_ready.is_empty() {
            debug!(
                pending = inner.posted_ready.len(),
                "reactor dropped with follow-up dispatches pending"
            );
        }
    }
}

/// A follow-up dispatch extracted from the registry, ready to run with
/// no borrow held.
struct ReadyDispatch {
    task_id: TaskId,
    callback: Box<dyn FnMut()>,

    /// Persistent watches get their callback handed back afterwards,
    /// unless the entry was canceled from inside its own callback.
    reinstall: bool,
}

/// Registry state shared between the [`Reactor`] and its handles.
pub(crate) struct Inner {
    poller: Poller,
    events: Vec<Event>,

    ids: TaskIdAllocator,

    /// Outstanding delayed tasks. The sole owner of their callbacks;
    /// lookup-then-remove here is what makes timer cancellation work.
    delayed_tasks: HashMap<TaskId, DelayedTask>,

    /// Armed timer records, earliest deadline first. Records cannot be
    /// unarmed; canceled ones fire into the discard path.
    timer_queue: BinaryHeap<TimerRecord>,

    /// Live descriptor watches by id.
    io_tasks: HashMap<TaskId, WatchEntry>,

    /// All watch ids per descriptor, armed or not. The OS carries one
    /// registration per descriptor holding the union of their
    /// interests.
    fd_index: HashMap<RawFd, Vec<TaskId>>,

    /// Interests currently armed with the poller, per descriptor.
    armed_fds: HashMap<RawFd, Interest>,

    /// Watch ids with a readiness follow-up posted but not yet run.
    posted_ready: VecDeque<TaskId>,

    run_state: RunState,
    quit_requested: bool,
}

impl Inner {
    fn new(poller: Poller) -> Self {
        Self {
            poller,
            events: Vec::new(),
            ids: TaskIdAllocator::new(),
            delayed_tasks: HashMap::new(),
            timer_queue: BinaryHeap::new(),
            io_tasks: HashMap::new(),
            fd_index: HashMap::new(),
            armed_fds: HashMap::new(),
            posted_ready: VecDeque::new(),
            run_state: RunState::Idle,
            quit_requested: false,
        }
    }

    pub(crate) fn post_delayed(
        &mut self,
        callback: Box<dyn FnOnce()>,
        delay: Duration,
        origin: &'static Location<'static>,
    ) -> TaskId {
        let task_id = self.ids.next_task_id();
        let deadline = Instant::now() + delay;

        self.delayed_tasks
            .insert(task_id, DelayedTask { callback, origin });
        self.timer_queue.push(TimerRecord { deadline, task_id });

        trace!(
            task_id = %task_id,
            delay_us = delay.as_micros() as u64,
            origin = %origin,
            "posted delayed task"
        );
        task_id
    }

    pub(crate) fn watch_fd(
        &mut self,
        fd: RawFd,
        mode: WatchMode,
        persistent: bool,
        callback: Box<dyn FnMut()>,
        origin: &'static Location<'static>,
    ) -> io::Result<TaskId> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let task_id = self.ids.next_task_id();
        self.io_tasks.insert(
            task_id,
            WatchEntry {
                fd,
                mode,
                persistent,
                callback: Some(callback),
                watching: true,
                state: WatchState::Idle,
                origin,
            },
        );
        self.fd_index.entry(fd).or_default().push(task_id);

        if let Err(err) = self.sync_fd(fd) {
            // Roll the entry back and restore whatever registration the
            // remaining entries on this descriptor need.
            self.io_tasks.remove(&task_id);
            self.unindex(task_id, fd);
            self.sync_fd_quiet(fd);

            debug!(fd, error = %err, origin = %origin, "failed to arm descriptor watch");
            return Err(err);
        }

        trace!(
            task_id = %task_id,
            fd,
            mode = ?mode,
            persistent,
            origin = %origin,
            "armed descriptor watch"
        );
        Ok(task_id)
    }

    pub(crate) fn cancel(&mut self, task_id: TaskId) -> bool {
        if let Some(task) = self.delayed_tasks.remove(&task_id) {
            // The armed timer record stays behind and fires into the
            // discard path.
            trace!(task_id = %task_id, origin = %task.origin, "canceled delayed task");
            return true;
        }

        let Some(entry) = self.io_tasks.get_mut(&task_id) else {
            return false;
        };

        match entry.state {
            // Already canceled; destruction is pending on the dispatch.
            WatchState::Draining => false,

            // A follow-up dispatch is in flight. The entry must not be
            // destroyed under it: release the callback now and leave a
            // tombstone for the dispatch to drain.
            WatchState::Notified => {
                entry.state = WatchState::Draining;
                entry.callback = None;
                trace!(
                    task_id = %task_id,
                    fd = entry.fd,
                    origin = %entry.origin,
                    "canceled watch with dispatch in flight"
                );
                true
            }

            WatchState::Idle => {
                let (fd, origin) = (entry.fd, entry.origin);
                self.io_tasks.remove(&task_id);
                self.unindex(task_id, fd);
                self.sync_fd_quiet(fd);
                trace!(task_id = %task_id, fd, origin = %origin, "canceled descriptor watch");
                true
            }
        }
    }

    pub(crate) fn break_loop(&mut self) {
        if matches!(self.run_state, RunState::Running | RunState::RunningOnce) {
            self.quit_requested = true;
            debug!("loop break requested");
        }
    }

    /// Marks entries made ready by the harvested poller events and
    /// posts their follow-up dispatches. No user code runs here.
    fn process_events(&mut self) {
        let events = std::mem::take(&mut self.events);

        for event in &events {
            let fd = event.token as RawFd;
            let Some(ids) = self.fd_index.get(&fd) else {
                continue;
            };

            let ids = ids.clone();
            let mut disarmed = false;
            for task_id in ids {
                let Some(entry) = self.io_tasks.get_mut(&task_id) else {
                    continue;
                };
                if entry.state != WatchState::Idle || !entry.watching {
                    continue;
                }
                if !entry.wants(event.readable, event.writable) {
                    continue;
                }

                entry.watching = false;
                entry.state = WatchState::Notified;
                self.posted_ready.push_back(task_id);
                disarmed = true;
                trace!(task_id = %task_id, fd, "descriptor ready, follow-up dispatch posted");
            }

            if disarmed {
                self.sync_fd_quiet(fd);
            }
        }

        self.events = events;
    }

    /// Pops the next due timer record and resolves it against the
    /// registry. Records whose task was canceled are discarded here:
    /// the stale-fire path.
    fn take_due_task(&mut self, now: Instant) -> Option<(TaskId, DelayedTask)> {
        while let Some(record) = self.timer_queue.peek() {
            if record.deadline > now {
                return None;
            }

            let record = self.timer_queue.pop().expect("peeked record");
            match self.delayed_tasks.remove(&record.task_id) {
                Some(task) => return Some((record.task_id, task)),
                None => trace!(task_id = %record.task_id, "stale timer fire, discarding"),
            }
        }
        None
    }

    /// Pops posted follow-ups until one yields a live callback to run.
    ///
    /// Draining tombstones are destroyed here, completing the deferred
    /// half of their cancellation.
    fn take_ready_dispatch(&mut self) -> Option<ReadyDispatch> {
        while let Some(task_id) = self.posted_ready.pop_front() {
            let Some(entry) = self.io_tasks.get(&task_id) else {
                trace!(task_id = %task_id, "follow-up dispatch for unknown watch, dropping");
                continue;
            };
            let (state, persistent, fd) = (entry.state, entry.persistent, entry.fd);

            match state {
                WatchState::Draining => {
                    self.io_tasks.remove(&task_id);
                    self.unindex(task_id, fd);
                    self.sync_fd_quiet(fd);
                    trace!(task_id = %task_id, fd, "destroyed canceled watch after drain");
                }

                WatchState::Notified if persistent => {
                    let entry = self.io_tasks.get_mut(&task_id).expect("entry just looked up");
                    entry.state = WatchState::Idle;
                    entry.watching = true;
                    let callback = entry.callback.take();

                    // Re-arm before the callback so readiness during it
                    // is not lost.
                    self.sync_fd_quiet(fd);

                    if let Some(callback) = callback {
                        return Some(ReadyDispatch {
                            task_id,
                            callback,
                            reinstall: true,
                        });
                    }
                }

                WatchState::Notified => {
                    let mut entry = self.io_tasks.remove(&task_id).expect("entry just looked up");
                    self.unindex(task_id, fd);
                    self.sync_fd_quiet(fd);

                    if let Some(callback) = entry.callback.take() {
                        return Some(ReadyDispatch {
                            task_id,
                            callback,
                            reinstall: false,
                        });
                    }
                }

                // A notification for an entry that was already re-armed;
                // nothing to run.
                WatchState::Idle => {}
            }
        }
        None
    }

    /// Hands a persistent watch its callback back after dispatch,
    /// unless the entry was canceled from inside that very callback.
    fn restore_callback(&mut self, task_id: TaskId, callback: Box<dyn FnMut()>) {
        if let Some(entry) = self.io_tasks.get_mut(&task_id) {
            if entry.callback.is_none() && entry.state != WatchState::Draining {
                entry.callback = Some(callback);
            }
        }
    }

    /// Computes how long the poller may sleep.
    fn wait_timeout(&mut self, may_block: bool, block_when_idle: bool) -> Option<Duration> {
        if !may_block || self.quit_requested || !self.posted_ready.is_empty() {
            return Some(Duration::ZERO);
        }

        match self.next_deadline() {
            Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
            None if block_when_idle || !self.io_tasks.is_empty() => None,
            None => Some(Duration::ZERO),
        }
    }

    /// Earliest live deadline, pruning records whose task is already
    /// gone so a canceled timer cannot force an early wake-up.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(record) = self.timer_queue.peek() {
            if self.delayed_tasks.contains_key(&record.task_id) {
                return Some(record.deadline);
            }

            let record = self.timer_queue.pop().expect("peeked record");
            trace!(task_id = %record.task_id, "pruned stale timer record");
        }
        None
    }

    pub(crate) fn work_remaining(&self) -> bool {
        !self.delayed_tasks.is_empty() || !self.io_tasks.is_empty() || !self.posted_ready.is_empty()
    }

    /// Union of the armed interests of every entry on `fd`.
    fn wanted_interest(&self, fd: RawFd) -> Option<Interest> {
        let ids = self.fd_index.get(&fd)?;

        let mut interest = Interest::EMPTY;
        for task_id in ids {
            if let Some(entry) = self.io_tasks.get(task_id) {
                interest = interest.merge(entry.armed_interest());
            }
        }

        (!interest.is_empty()).then_some(interest)
    }

    /// Brings the OS registration for `fd` in line with the registry.
    fn sync_fd(&mut self, fd: RawFd) -> io::Result<()> {
        let wanted = self.wanted_interest(fd);
        let current = self.armed_fds.get(&fd).copied();

        match (current, wanted) {
            (None, Some(interest)) => {
                self.poller.register(fd, fd as usize, interest)?;
                self.armed_fds.insert(fd, interest);
            }
            (Some(current), Some(interest)) if current != interest => {
                self.poller.reregister(fd, fd as usize, interest)?;
                self.armed_fds.insert(fd, interest);
            }
            (Some(_), None) => {
                self.poller.deregister(fd);
                self.armed_fds.remove(&fd);
            }
            _ => {}
        }

        Ok(())
    }

    /// [`sync_fd`](Self::sync_fd) for disarm paths, where the
    /// registration may already be gone (the caller closed the fd).
    fn sync_fd_quiet(&mut self, fd: RawFd) {
        if let Err(err) = self.sync_fd(fd) {
            debug!(fd, error = %err, "failed to update descriptor registration");
        }
    }

    fn unindex(&mut self, task_id: TaskId, fd: RawFd) {
        if let Some(ids) = self.fd_index.get_mut(&fd) {
            ids.retain(|other| *other != task_id);
            if ids.is_empty() {
                self.fd_index.remove(&fd);
            }
        }
    }
}
