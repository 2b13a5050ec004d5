/// An I/O event reported by the poller.
///
/// An `Event` represents readiness information for a registered
/// file descriptor. It is produced by the poller and consumed by the
/// reactor to decide which watch entries to dispatch.
///
/// The event indicates whether the file descriptor is readable,
/// writable, or both.
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// The reactor registers descriptors with their own fd as the
    /// token, so this maps straight back to the watched descriptor.
    pub(crate) token: usize,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}
