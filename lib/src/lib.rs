//! This library tracks the capture buffers ("frames") of a camera ISP
//! pipeline through their lifecycle, as they move between the video node,
//! the hardware scheduler and back to user space:
//!
//! ```text
//!  qbuf            scheduler          interrupt           dqbuf
//! Free ──> Request ─────────> Process ─────────> Complete ─────> Free
//! ```
//!
//! * The `manager` module provides [`FrameManager`], which owns a fixed pool of
//!   [`FrameDescriptor`]s and one FIFO [`StateQueue`] per [`FrameState`]. All
//!   state transitions happen under a single lock, so that every frame is
//!   always in exactly one queue and the per-state counts always add up to the
//!   pool size, no matter how many threads are driving the pool.
//!
//! * The `dispatch` module provides the seam between the manager and the
//!   code programming the hardware: frames can be bound to a [`WorkToken`]
//!   that hands them to a [`Dispatcher`], e.g. a [`WorkerPool`].
//!
//! The manager never waits: every operation either completes immediately or
//! fails. Waiting for a frame to reach a given state is left to the caller.
//!
//! # Examples
//!
//! ```
//! use framemgr::{FrameManager, FrameMgrId, FrameState};
//!
//! let mgr = FrameManager::new(FrameMgrId::SHOT, "video0");
//! mgr.open(4).unwrap();
//!
//! // qbuf
//! mgr.trans(2, FrameState::Request).unwrap();
//! // The scheduler picks the next frame to program.
//! let index = mgr.get(FrameState::Request).unwrap().unwrap();
//! mgr.put(index, FrameState::Process).unwrap();
//! // The interrupt handler reports completion.
//! mgr.trans(index, FrameState::Complete).unwrap();
//!
//! assert_eq!(mgr.count(FrameState::Complete).unwrap(), 1);
//!
//! // streamoff
//! mgr.flush().unwrap();
//! assert_eq!(mgr.count(FrameState::Free).unwrap(), 4);
//! ```
pub mod dispatch;
pub mod frame;
pub mod manager;
pub mod queue;
pub mod state;

pub use dispatch::{Dispatcher, WorkToken, WorkerPool};
pub use frame::FrameDescriptor;
pub use manager::{FrameManager, FrameMgrError, FrameMgrGuard, Result};
pub use queue::StateQueue;
pub use state::{FrameMgrId, FrameState, TraceMask, NR_FRAME_STATE};
