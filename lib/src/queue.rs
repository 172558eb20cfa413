use std::collections::{TryReserveError, VecDeque};

/// FIFO of frame indices sharing one lifecycle state.
///
/// Frames are appended at the tail and taken from the head, so they leave a
/// state in the order they entered it. A queue does no locking on its own: it
/// only lives inside a [`FrameManager`](crate::FrameManager), which serializes
/// all accesses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateQueue {
    members: VecDeque<usize>,
}

impl StateQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StateQueue {
            members: VecDeque::with_capacity(capacity),
        }
    }

    /// Make room for `additional` more members without reallocating.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.members.try_reserve_exact(additional)
    }

    /// Number of frames in the queue. O(1).
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Append `index` at the tail of the queue. The caller must make sure the
    /// frame is not already a member of any queue.
    pub fn push_back(&mut self, index: usize) {
        debug_assert!(
            !self.contains(index),
            "frame {} queued twice in the same state",
            index
        );
        self.members.push_back(index);
    }

    /// Insert `index` back at the head of the queue, i.e. as the next frame to
    /// leave it. Same requirements as [`push_back`](Self::push_back).
    pub fn push_front(&mut self, index: usize) {
        debug_assert!(
            !self.contains(index),
            "frame {} queued twice in the same state",
            index
        );
        self.members.push_front(index);
    }

    pub fn pop_front(&mut self) -> Option<usize> {
        self.members.pop_front()
    }

    pub fn peek_front(&self) -> Option<usize> {
        self.members.front().copied()
    }

    pub fn peek_back(&self) -> Option<usize> {
        self.members.back().copied()
    }

    /// Return the first member, in FIFO order, for which `pred` is true.
    pub fn find<P>(&self, mut pred: P) -> Option<usize>
    where
        P: FnMut(usize) -> bool,
    {
        self.members.iter().copied().find(|&index| pred(index))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members.contains(&index)
    }

    /// Remove `index` from wherever it is in the queue. Returns `false` if it
    /// was not a member.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.members.iter().position(|&i| i == index) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Iterate over the members in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }
}
