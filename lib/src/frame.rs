use crate::dispatch::WorkToken;
use crate::state::FrameState;

/// Lifecycle metadata of one capture buffer slot.
///
/// Descriptors live in the pool of their [`FrameManager`](crate::FrameManager)
/// and are never handed out by value: the manager returns snapshots of them,
/// and its lock guard gives access to the metadata fields only. `index` and
/// `state` can only be changed by the manager itself.
#[derive(Clone, Debug)]
pub struct FrameDescriptor {
    index: usize,
    state: FrameState,
    /// Sequence counter of the frame, as given by its producer (usually the
    /// hardware frame counter). Used by interrupt handlers to find a frame.
    pub fcount: u64,
    /// Bitmask of outputs (one bit per sub-device id) still expected for this
    /// frame.
    pub out_flags: u64,
    bak_flags: u64,
    /// Queue the frame has been taken out of by `get()`, while untracked.
    taken_from: Option<FrameState>,
    work: Option<WorkToken>,
}

impl FrameDescriptor {
    pub(crate) fn new(index: usize, work: Option<WorkToken>) -> Self {
        FrameDescriptor {
            index,
            state: FrameState::Invalid,
            fcount: 0,
            out_flags: 0,
            bak_flags: 0,
            taken_from: None,
            work,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FrameState) {
        self.state = state;
        self.taken_from = None;
    }

    /// Mark the frame as untracked after it has been popped from the head of
    /// `state`.
    pub(crate) fn take_from(&mut self, state: FrameState) {
        self.state = FrameState::Invalid;
        self.taken_from = Some(state);
    }

    /// The queue the frame has been taken from, if it is untracked because of
    /// a `get()`.
    pub(crate) fn taken_from(&self) -> Option<FrameState> {
        self.taken_from
    }

    /// Value of `out_flags` at the time the frame last entered `Process`.
    ///
    /// Comparing it with the current `out_flags` tells whether the hardware
    /// consumed or dropped the frame's outputs. Always zero for pools owned by
    /// the hardware layer.
    pub fn bak_flags(&self) -> u64 {
        self.bak_flags
    }

    pub(crate) fn backup_out_flags(&mut self) {
        self.bak_flags = self.out_flags;
    }

    /// Outputs the frame was given when it entered `Process` and that are
    /// still pending.
    pub fn dropped_outputs(&self) -> u64 {
        self.out_flags & self.bak_flags
    }

    /// Whether the hardware handled every output it was given when the frame
    /// entered `Process`. Always true for pools owned by the hardware layer,
    /// which keep no backup.
    pub fn outputs_done(&self) -> bool {
        self.dropped_outputs() == 0
    }

    /// The work item bound to this frame, if the pool has been opened with a
    /// dispatcher.
    pub fn work_token(&self) -> Option<&WorkToken> {
        self.work.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_out_flags() {
        let mut frame = FrameDescriptor::new(2, None);
        assert_eq!(frame.index(), 2);
        assert_eq!(frame.state(), FrameState::Invalid);
        assert!(frame.work_token().is_none());

        frame.out_flags = 0b101;
        frame.backup_out_flags();
        assert_eq!(frame.bak_flags(), 0b101);
        assert!(!frame.outputs_done());

        // The hardware completes one output, the backup is left untouched.
        frame.out_flags &= !0b1;
        assert_eq!(frame.bak_flags(), 0b101);
        assert_eq!(frame.dropped_outputs(), 0b100);
        frame.out_flags = 0;
        assert!(frame.outputs_done());
    }

    #[test]
    fn test_outputs_done_ignores_new_outputs() {
        let mut frame = FrameDescriptor::new(0, None);
        frame.out_flags = 0b01;
        frame.backup_out_flags();

        // An output requested after entering `Process` is not the hardware's
        // to complete.
        frame.out_flags = 0b10;
        assert!(frame.outputs_done());
        assert_eq!(frame.dropped_outputs(), 0);

        frame.out_flags = 0b11;
        assert!(!frame.outputs_done());
        assert_eq!(frame.dropped_outputs(), 0b01);
    }

    #[test]
    fn test_take_from() {
        let mut frame = FrameDescriptor::new(1, None);
        frame.set_state(FrameState::Request);
        assert_eq!(frame.taken_from(), None);

        frame.take_from(FrameState::Request);
        assert_eq!(frame.state(), FrameState::Invalid);
        assert_eq!(frame.taken_from(), Some(FrameState::Request));

        frame.set_state(FrameState::Process);
        assert_eq!(frame.taken_from(), None);
    }
}
