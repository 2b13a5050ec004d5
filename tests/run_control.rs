use tactus::{Reactor, ReactorBuilder, WatchMode};

use std::cell::Cell;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_run_until_quit_closure() {
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let quit = reactor.quit_closure();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor.post_delayed_task(
        move || {
            f.set(true);
            quit();
        },
        Duration::from_millis(10),
    );

    reactor.run();

    assert!(fired.get(), "the task must run before the loop stops");
}

#[test]
fn test_break_loop_is_idempotent() {
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();

    reactor.post_task(move || {
        handle.break_loop();
        handle.break_loop();
    });

    reactor.run();
}

#[test]
fn test_break_loop_stops_dispatch_after_current_callback() {
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();
    let later_fired = Rc::new(Cell::new(false));

    // Both tasks are due in the same batch; the first breaks the loop,
    // so the second must stay pending instead of running.
    reactor.post_task(move || handle.break_loop());

    let f = later_fired.clone();
    reactor.post_task(move || f.set(true));

    reactor.run();

    assert!(
        !later_fired.get(),
        "tasks behind a break must stay pending, not run"
    );

    // The undispatched task is still pending and runs on the next drive.
    reactor.run_once(false);
    assert!(later_fired.get());
}

#[test]
fn test_quit_closure_outside_run_is_a_noop() {
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let quit = reactor.quit_closure();

    // Not running: the request must not stick and poison the next run.
    quit();

    let quit_for_real = reactor.quit_closure();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor.post_delayed_task(
        move || {
            f.set(true);
            quit_for_real();
        },
        Duration::from_millis(5),
    );

    reactor.run();

    assert!(fired.get(), "the loop must still run to the real quit");
}

#[test]
fn test_run_once_without_work_returns_immediately() {
    let mut reactor = Reactor::new().expect("failed to create reactor");

    let start = Instant::now();
    let remaining = reactor.run_once(false);

    assert!(!remaining, "an empty loop has no work remaining");
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "run_once(false) must not block"
    );
}

#[test]
fn test_run_once_may_block_without_work_returns_immediately() {
    let mut reactor = Reactor::new().expect("failed to create reactor");

    let start = Instant::now();
    let remaining = reactor.run_once(true);

    assert!(!remaining);
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "run_once(true) must not block when nothing is outstanding"
    );
}

#[test]
fn test_end_to_end_delay_ordering_and_drain() {
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    let o = order.clone();
    reactor.post_delayed_task(move || o.borrow_mut().push(50), Duration::from_millis(50));

    let o = order.clone();
    reactor.post_delayed_task(move || o.borrow_mut().push(10), Duration::from_millis(10));

    while reactor.run_once(true) {}

    assert_eq!(*order.borrow(), vec![10, 50]);
    assert!(
        !reactor.run_once(false),
        "run_once must report no remaining work after both fired"
    );
}

#[test]
fn test_drop_with_follow_up_dispatch_pending() {
    let (watched, mut peer) = UnixStream::pair().expect("failed to create socket pair");
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, true, move || {
            f.set(true);
        })
        .expect("failed to arm watch");

    peer.write_all(b"x").expect("write failed");

    // Readiness is harvested first, then this task breaks the loop, so
    // run() returns with the watch's follow-up dispatch still queued.
    reactor.post_task(move || handle.break_loop());
    reactor.run();

    assert!(
        !fired.get(),
        "the follow-up dispatch must not have run before the break"
    );

    drop(reactor);

    assert!(
        !fired.get(),
        "dropping the reactor must neutralize the pending dispatch, not run it"
    );
}

#[test]
fn test_handle_operations_after_drop_are_benign() {
    let reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();
    let id = reactor.post_task(|| {});

    assert!(handle.is_alive());
    drop(reactor);
    assert!(!handle.is_alive());

    assert!(
        handle.post_task(|| {}).is_null(),
        "posting through a dead handle must return the null id"
    );
    assert!(
        !handle.cancel_task(id),
        "canceling through a dead handle must report false"
    );
    handle
        .watch_file_descriptor(0, WatchMode::Read, false, || {})
        .expect_err("watching through a dead handle must fail");
    handle.break_loop();
}

#[test]
fn test_builder_event_capacity() {
    let mut reactor = ReactorBuilder::new()
        .event_capacity(8)
        .build()
        .expect("failed to build reactor");
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor.post_task(move || f.set(true));

    while reactor.run_once(true) {}

    assert!(fired.get());
}
