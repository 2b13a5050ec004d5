//! Platform-specific I/O poller abstraction.
//!
//! This module provides a unified interface over platform-specific
//! I/O polling mechanisms (epoll on Linux, kqueue on macOS).
//!
//! The poller is used by the reactor to:
//! - wait for I/O readiness events with an optional deadline,
//! - keep at most one OS registration per descriptor, armed with the
//!   union of the interests of all watch entries on that descriptor.
//!
//! The concrete implementation is selected at compile time depending
//! on the target operating system.

pub(crate) mod common;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;
