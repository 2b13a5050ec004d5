use std::fmt;

/// Opaque handle identifying one scheduled unit of work.
///
/// A `TaskId` is returned by every post/watch operation on the loop and is
/// the only way to refer to that work afterwards, e.g. to cancel it with
/// [`Reactor::cancel_task`](crate::Reactor::cancel_task).
///
/// Identifiers are strictly increasing and never reused within the
/// lifetime of one [`Reactor`](crate::Reactor) instance, so a stored id
/// can never alias a newer task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Reserved sentinel meaning "no task".
    ///
    /// Never returned by a successful post/watch operation.
    pub const NULL: TaskId = TaskId(0);

    /// Returns `true` if this is the reserved [`NULL`](Self::NULL) id.
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone allocator cursor for [`TaskId`]s.
///
/// Wraps only on `u64` overflow, which is treated as an unreachable
/// invariant violation rather than handled explicitly.
pub(crate) struct TaskIdAllocator {
    last_id: u64,
}

impl TaskIdAllocator {
    pub(crate) fn new() -> Self {
        Self { last_id: 0 }
    }

    /// Returns a previously unused, strictly increasing id.
    ///
    /// Never returns [`TaskId::NULL`].
    pub(crate) fn next_task_id(&mut self) -> TaskId {
        self.last_id += 1;
        TaskId(self.last_id)
    }
}
