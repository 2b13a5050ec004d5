//! Fluent builder for Reactor construction.
//!
//! Provides a builder pattern interface for creating and configuring
//! [`Reactor`] instances.

use crate::reactor::{Poller, Reactor};

use std::io;

/// Default number of OS events harvested per wait call.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Builder for constructing [`Reactor`] instances with a fluent API.
///
/// # Example
/// ```ignore
/// let reactor = ReactorBuilder::new().event_capacity(256).build()?;
/// ```
pub struct ReactorBuilder {
    event_capacity: usize,
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorBuilder {
    /// Creates a new reactor builder with default configuration.
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets how many OS events one poller wait may harvest.
    ///
    /// Readiness beyond the capacity is not lost; it is reported by the
    /// next wait. Values below 1 are clamped to 1.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the configured [`Reactor`].
    ///
    /// Fails if the OS poller cannot be created.
    pub fn build(self) -> io::Result<Reactor> {
        let poller = Poller::new(self.event_capacity)?;

        Ok(Reactor::from_poller(poller))
    }
}
