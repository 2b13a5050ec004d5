/// Readiness interests for one registered file descriptor.
///
/// The reactor coalesces every watch entry armed on a descriptor into a
/// single `Interest` before handing it to the poller, since the OS keeps
/// at most one registration per descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// An interest with no readiness bits set.
    ///
    /// Never registered with the OS; used as the fold seed when
    /// combining entries.
    pub(crate) const EMPTY: Interest = Interest {
        read: false,
        write: false,
    };

    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    /// Union of two interests.
    pub(crate) fn merge(self, other: Interest) -> Interest {
        Interest {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }
}
