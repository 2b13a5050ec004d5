use tactus::{Reactor, TaskId, WatchMode};

use std::cell::Cell;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

fn socket_pair() -> (UnixStream, UnixStream) {
    UnixStream::pair().expect("failed to create socket pair")
}

#[test]
fn test_one_shot_read_watch_fires_once() {
    let (watched, mut peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, false, move || {
            c.set(c.get() + 1);
        })
        .expect("failed to arm watch");

    peer.write_all(b"x").expect("write failed");

    reactor.run_once(true);
    assert_eq!(count.get(), 1, "one-shot watch must fire exactly once");

    // Data is still unread; a removed watch must not fire again.
    reactor.run_once(false);
    assert_eq!(count.get(), 1, "one-shot watch must be removed after firing");

    assert!(
        !reactor.cancel_task(id),
        "cancel after a one-shot fired must report false"
    );
}

#[test]
fn test_persistent_watch_refires_until_canceled() {
    let (watched, mut peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, true, move || {
            c.set(c.get() + 1);
        })
        .expect("failed to arm watch");

    peer.write_all(b"x").expect("write failed");

    reactor.run_once(true);
    assert_eq!(count.get(), 1);

    // The byte is still buffered, so the re-armed watch reports
    // readiness again on the next iteration.
    reactor.run_once(true);
    assert_eq!(count.get(), 2, "persistent watch must stay armed after firing");

    assert!(reactor.cancel_task(id), "cancel of a live watch must succeed");

    reactor.run_once(false);
    assert_eq!(count.get(), 2, "canceled watch must not fire again");
}

#[test]
fn test_write_watch_fires_when_writable() {
    let (watched, _peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Write, false, move || {
            f.set(true);
        })
        .expect("failed to arm watch");

    // A fresh socket has an empty send buffer and is writable at once.
    reactor.run_once(true);
    assert!(fired.get(), "write watch must fire on a writable socket");
}

#[test]
fn test_read_write_mode_fires_on_either_readiness() {
    let (watched, _peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::ReadWrite, false, move || {
            f.set(true);
        })
        .expect("failed to arm watch");

    // Nothing was written, so only writability can satisfy the watch.
    reactor.run_once(true);
    assert!(fired.get(), "read-write watch must fire on writability alone");
}

#[test]
fn test_independent_watches_on_the_same_descriptor() {
    let (watched, mut peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let read_count = Rc::new(Cell::new(0));
    let write_count = Rc::new(Cell::new(0));

    let c = read_count.clone();
    let read_id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, true, move || {
            c.set(c.get() + 1);
        })
        .expect("failed to arm read watch");

    let c = write_count.clone();
    let write_id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Write, true, move || {
            c.set(c.get() + 1);
        })
        .expect("failed to arm write watch");

    assert_ne!(read_id, write_id, "each watch gets its own id");

    // Writable only: the read watch must stay silent.
    reactor.run_once(true);
    assert_eq!(read_count.get(), 0, "read watch must not fire while unreadable");
    assert_eq!(write_count.get(), 1, "write watch must fire on writability");

    peer.write_all(b"x").expect("write failed");

    reactor.run_once(true);
    assert_eq!(read_count.get(), 1, "read watch must fire once data arrives");
    assert_eq!(write_count.get(), 2);

    assert!(reactor.cancel_task(read_id));
    assert!(reactor.cancel_task(write_id));
}

#[test]
fn test_watch_registration_failure_is_synchronous() {
    let reactor = Reactor::new().expect("failed to create reactor");

    let err = reactor
        .watch_file_descriptor(-1, WatchMode::Read, false, || {})
        .expect_err("watching an invalid descriptor must fail");
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));

    let closed_fd = {
        let (a, _b) = socket_pair();
        a.as_raw_fd()
        // Both ends drop here, closing the descriptor.
    };

    reactor
        .watch_file_descriptor(closed_fd, WatchMode::Read, false, || {})
        .expect_err("watching a closed descriptor must fail");
}

#[test]
fn test_cancel_while_dispatch_in_flight_suppresses_callback() {
    let (watched, mut peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();
    let fired = Rc::new(Cell::new(false));
    let cancel_result = Rc::new(Cell::new(false));

    let f = fired.clone();
    let id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, true, move || {
            f.set(true);
        })
        .expect("failed to arm watch");

    peer.write_all(b"x").expect("write failed");

    // Readiness is harvested before delayed tasks run, so this task
    // cancels the watch after its follow-up dispatch was posted but
    // before it executes.
    let res = cancel_result.clone();
    reactor.post_task(move || {
        res.set(handle.cancel_task(id));
    });

    reactor.run_once(true);

    assert!(
        cancel_result.get(),
        "cancel of a watch with a dispatch in flight must succeed"
    );
    assert!(
        !fired.get(),
        "callback of a watch canceled mid-dispatch must never run"
    );
    assert!(
        !reactor.cancel_task(id),
        "the drained watch must be gone afterwards"
    );
    assert!(!reactor.run_once(false), "no work must remain");
}

#[test]
fn test_watch_canceling_itself_from_its_own_callback() {
    let (watched, mut peer) = socket_pair();
    let mut reactor = Reactor::new().expect("failed to create reactor");
    let handle = reactor.handle();
    let count = Rc::new(Cell::new(0));

    let own_id = Rc::new(Cell::new(TaskId::NULL));

    let c = count.clone();
    let oid = own_id.clone();
    let id = reactor
        .watch_file_descriptor(watched.as_raw_fd(), WatchMode::Read, true, move || {
            c.set(c.get() + 1);
            assert!(
                handle.cancel_task(oid.get()),
                "a watch must be able to cancel itself from its callback"
            );
        })
        .expect("failed to arm watch");
    own_id.set(id);

    peer.write_all(b"x").expect("write failed");

    reactor.run_once(true);
    assert_eq!(count.get(), 1);

    // Still readable, but the watch removed itself.
    reactor.run_once(false);
    assert_eq!(count.get(), 1, "a self-canceled watch must not fire again");
}
