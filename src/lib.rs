//! # Tactus
//!
//! **Tactus** is a single-threaded callback event loop for Rust,
//! designed as the low-level scheduling layer for daemons that mix
//! deadline timers and file-descriptor readiness on one thread.
//!
//! Unlike future-based runtimes, Tactus dispatches plain closures: you
//! post a delayed task or watch a descriptor, keep the returned
//! [`TaskId`], and cancel through it at any point before the callback
//! runs. Cancellation is uniform even though the underlying timer
//! primitive cannot be unarmed once scheduled: the loop dispatches
//! through its registry and discards fires whose task is already gone.
//!
//! The loop is built around:
//!
//! - A **deadline-ordered timer queue** with posting-order tie-breaks,
//!   so dispatch stays deterministic
//! - **Descriptor watches** (one-shot or persistent, read/write/both)
//!   over epoll (Linux) or kqueue (macOS)
//! - An **id-based cancellation contract** shared by timers and
//!   watches, safe even against dispatches already in flight
//! - A **run/quit control surface**: `run`, `run_once(may_block)`,
//!   `break_loop`, and a quit closure that is a no-op while the loop is
//!   not running
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tactus::{Reactor, WatchMode};
//! use std::time::Duration;
//!
//! let mut reactor = Reactor::new()?;
//! let quit = reactor.quit_closure();
//!
//! reactor.post_delayed_task(
//!     move || {
//!         println!("tick");
//!         quit();
//!     },
//!     Duration::from_millis(100),
//! );
//!
//! reactor.run();
//! ```
//!
//! ## Threading
//!
//! Exactly one logical thread owns a [`Reactor`]; the type is `!Send`
//! by construction. Callbacks run serialized on that thread and reach
//! back into the loop through a [`ReactorHandle`], which never keeps
//! the loop alive.

mod builder;
mod reactor;
mod task;

pub use builder::ReactorBuilder;
pub use reactor::{Reactor, ReactorHandle, WatchMode};
pub use task::TaskId;
