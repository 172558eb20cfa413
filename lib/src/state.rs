use std::fmt::{self, Display};

use bitflags::bitflags;
use enumn::N;

/// Number of states that own a queue, i.e. all states but `Invalid`.
pub const NR_FRAME_STATE: usize = 4;

/// Lifecycle stage of a frame, ordered by pipeline stage.
///
/// Every tracked frame sits in exactly one of the queue states. `Invalid` is
/// never a queue: it marks a frame that has been taken out with `get()` and
/// not yet put back anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, N)]
#[repr(u32)]
pub enum FrameState {
    /// The frame can be queued by user space.
    Free = 0,
    /// The frame has been queued and waits for the scheduler.
    Request = 1,
    /// The frame has been handed to the hardware.
    Process = 2,
    /// The hardware is done with the frame, which waits to be dequeued.
    Complete = 3,
    Invalid = 4,
}

impl FrameState {
    /// All the states that own a queue, in pipeline order.
    pub const QUEUES: [FrameState; NR_FRAME_STATE] = [
        FrameState::Free,
        FrameState::Request,
        FrameState::Process,
        FrameState::Complete,
    ];

    /// Returns the index of the queue owned by this state, or `None` for
    /// `Invalid`.
    pub fn queue_index(self) -> Option<usize> {
        match self {
            FrameState::Invalid => None,
            s => Some(s as usize),
        }
    }

    pub fn is_valid(self) -> bool {
        self != FrameState::Invalid
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameState::Free => "FREE",
            FrameState::Request => "REQUEST",
            FrameState::Process => "PROCESS",
            FrameState::Complete => "COMPLETE",
            FrameState::Invalid => "INVALID",
        }
    }
}

impl Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Identity of a frame manager, used to tell pools apart in diagnostics
    /// and to select pool-specific behavior.
    ///
    /// The low 12 bits are free for the owner to encode a sub-identifier
    /// (typically the id of the hardware IP or video node).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FrameMgrId: u32 {
        const SUB_ID = 0x0000_0fff;
        /// Late-completion companion pool of a hardware IP.
        const LATE = 0x0000_f000;
        /// The frames carry per-frame shot metadata.
        const SHOT = 0x0001_0000;
        /// The pool is owned by the hardware layer. Such pools never need the
        /// output flags snapshot taken when entering `Process`.
        const HW = 0x0100_0000;
    }
}

impl FrameMgrId {
    /// Identity of the pool of hardware IP `ip`.
    pub fn hw(ip: u32) -> Self {
        FrameMgrId::HW | FrameMgrId::from_bits_retain(ip & FrameMgrId::SUB_ID.bits())
    }

    pub fn sub_id(&self) -> u32 {
        (*self & FrameMgrId::SUB_ID).bits()
    }

    pub fn is_hw(&self) -> bool {
        self.contains(FrameMgrId::HW)
    }
}

bitflags! {
    /// Selects which queues are dumped by the diagnostic printers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TraceMask: u32 {
        const FREE = 1 << FrameState::Free as u32;
        const REQUEST = 1 << FrameState::Request as u32;
        const PROCESS = 1 << FrameState::Process as u32;
        const COMPLETE = 1 << FrameState::Complete as u32;
    }
}

impl TraceMask {
    /// Whether queue `state` should be dumped. Always false for `Invalid`.
    pub fn traces(&self, state: FrameState) -> bool {
        match state.queue_index() {
            Some(i) => self.bits() & (1 << i) != 0,
            None => false,
        }
    }
}

impl Default for TraceMask {
    fn default() -> Self {
        TraceMask::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u32() {
        for s in FrameState::QUEUES {
            assert_eq!(FrameState::n(s as u32), Some(s));
        }
        assert_eq!(FrameState::n(4), Some(FrameState::Invalid));
        assert_eq!(FrameState::n(5), None);
    }

    #[test]
    fn test_queue_index() {
        assert_eq!(FrameState::Free.queue_index(), Some(0));
        assert_eq!(FrameState::Complete.queue_index(), Some(3));
        assert_eq!(FrameState::Invalid.queue_index(), None);
        assert_eq!(FrameState::Process.to_string(), "PROCESS");
    }

    #[test]
    fn test_hw_id() {
        let id = FrameMgrId::hw(3);
        assert!(id.is_hw());
        assert_eq!(id.sub_id(), 3);

        let late = id | FrameMgrId::LATE;
        assert!(late.is_hw());
        assert_eq!(late.sub_id(), 3);

        assert!(!FrameMgrId::SHOT.is_hw());
    }

    #[test]
    fn test_trace_mask() {
        let mask = TraceMask::REQUEST | TraceMask::COMPLETE;
        assert!(!mask.traces(FrameState::Free));
        assert!(mask.traces(FrameState::Request));
        assert!(!mask.traces(FrameState::Process));
        assert!(mask.traces(FrameState::Complete));
        assert!(!TraceMask::all().traces(FrameState::Invalid));
    }
}
