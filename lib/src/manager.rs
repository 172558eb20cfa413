//! The frame manager: a pool of frame descriptors and the state machine moving
//! them between per-state FIFO queues.
//!
//! All the queues and the `state` of every descriptor of a manager are
//! protected by a single lock, so that a frame can be moved from one queue to
//! another atomically and the per-state counts always add up to the pool size.
//! Every method of [`FrameManager`] takes the lock for its whole duration and
//! never blocks on anything else. Callers that need to chain several
//! operations atomically can hold the lock explicitly with
//! [`FrameManager::lock`].

use std::fmt::{self, Display, Write as _};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::dispatch::{Dispatcher, WorkToken};
use crate::frame::FrameDescriptor;
use crate::queue::StateQueue;
use crate::state::{FrameMgrId, FrameState, TraceMask, NR_FRAME_STATE};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameMgrError {
    #[error("invalid frame state {0}")]
    InvalidState(FrameState),
    #[error("frame {index} does not exist (pool size {pool_size})")]
    NullFrame { index: usize, pool_size: usize },
    #[error("frame {index} is already queued in {state}")]
    AlreadyQueued { index: usize, state: FrameState },
    #[error("frame {index} claims to be in {state}, but that queue is empty")]
    EmptySource { index: usize, state: FrameState },
    #[error("frame {index} claims to be in {state}, but is not in that queue")]
    NotQueued { index: usize, state: FrameState },
    #[error("cannot allocate a pool of {0} frames")]
    AllocationFailed(usize),
}

impl FrameMgrError {
    /// Whether the error means the pool accounting is corrupted, in which case
    /// no correct continuation is possible.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameMgrError::EmptySource { .. } | FrameMgrError::NotQueued { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameMgrError>;

/// Everything protected by the manager's lock.
#[derive(Default)]
struct Pool {
    frames: Vec<FrameDescriptor>,
    queues: [StateQueue; NR_FRAME_STATE],
}

/// Tracks a pool of frames through their lifecycle:
/// `Free ⇄ Request → Process → Complete → Free`.
///
/// A manager is created closed, with its identity only. [`open`] allocates the
/// pool and puts all its frames into `Free`, [`close`] releases it.
///
/// [`open`]: FrameManager::open
/// [`close`]: FrameManager::close
pub struct FrameManager {
    id: FrameMgrId,
    name: String,
    trace_mask: AtomicU32,
    pool: Mutex<Pool>,
}

impl FrameManager {
    /// Create a closed manager.
    pub fn new(id: FrameMgrId, name: &str) -> Self {
        debug!("[{}] frame manager probed (id 0x{:08x})", name, id.bits());

        FrameManager {
            id,
            name: name.to_string(),
            trace_mask: AtomicU32::new(TraceMask::default().bits()),
            pool: Mutex::new(Default::default()),
        }
    }

    pub fn id(&self) -> FrameMgrId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trace_mask(&self) -> TraceMask {
        TraceMask::from_bits_truncate(self.trace_mask.load(Ordering::Relaxed))
    }

    /// Select the queues dumped by [`print_queue`](FrameManager::print_queue)
    /// and [`print_all`](FrameManager::print_all).
    pub fn set_trace_mask(&self, mask: TraceMask) {
        self.trace_mask.store(mask.bits(), Ordering::Relaxed);
    }

    /// Take the manager's lock. All the operations of the returned guard are
    /// performed atomically with respect to other users of the manager.
    pub fn lock(&self) -> FrameMgrGuard<'_> {
        FrameMgrGuard {
            mgr: self,
            pool: self.pool.lock().unwrap(),
        }
    }

    /// Allocate a pool of `buffer_count` frames, all in `Free`.
    ///
    /// An already open pool is closed first, releasing all its frames no
    /// matter their state. A `buffer_count` of zero just closes the manager.
    pub fn open(&self, buffer_count: usize) -> Result<()> {
        self.lock().open(buffer_count, None)
    }

    /// Same as [`open`](FrameManager::open), but also binds a [`WorkToken`]
    /// dispatching to `dispatcher` to every frame.
    pub fn open_with_dispatcher(
        &self,
        buffer_count: usize,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<()> {
        self.lock().open(buffer_count, Some(dispatcher))
    }

    /// Release the pool. Does nothing if the manager is already closed.
    pub fn close(&self) {
        self.lock().close()
    }

    pub fn is_open(&self) -> bool {
        self.lock().pool_size() > 0
    }

    pub fn pool_size(&self) -> usize {
        self.lock().pool_size()
    }

    /// Number of frames currently in `state`.
    pub fn count(&self, state: FrameState) -> Result<usize> {
        self.lock().count(state)
    }

    /// See [`FrameMgrGuard::put`].
    pub fn put(&self, index: usize, state: FrameState) -> Result<()> {
        self.lock().put(index, state)
    }

    /// See [`FrameMgrGuard::get`].
    pub fn get(&self, state: FrameState) -> Result<Option<usize>> {
        self.lock().get(state)
    }

    /// See [`FrameMgrGuard::trans`].
    pub fn trans(&self, index: usize, state: FrameState) -> Result<()> {
        self.lock().trans(index, state)
    }

    /// Index of the frame at the head of `state`, i.e. the next one to leave it.
    pub fn peek(&self, state: FrameState) -> Result<Option<usize>> {
        self.lock().peek(state)
    }

    /// Index of the frame at the tail of `state`, i.e. the last one to enter it.
    pub fn peek_tail(&self, state: FrameState) -> Result<Option<usize>> {
        self.lock().peek_tail(state)
    }

    /// See [`FrameMgrGuard::find`].
    pub fn find<P>(&self, state: FrameState, pred: P) -> Result<Option<usize>>
    where
        P: FnMut(&FrameDescriptor) -> bool,
    {
        self.lock().find(state, pred)
    }

    /// Find the frame of `state` whose sequence counter is `fcount`.
    pub fn find_by_fcount(&self, state: FrameState, fcount: u64) -> Result<Option<usize>> {
        self.lock().find(state, |frame| frame.fcount == fcount)
    }

    /// Snapshot of the descriptor of frame `index`.
    pub fn frame(&self, index: usize) -> Result<FrameDescriptor> {
        self.lock().frame(index).cloned()
    }

    /// Run `f` on the metadata of frame `index` with the lock held.
    pub fn update_frame<R, F>(&self, index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&mut FrameDescriptor) -> R,
    {
        let mut guard = self.lock();
        Ok(f(guard.frame_mut(index)?))
    }

    /// The work item bound to frame `index`, if the pool has been opened with
    /// a dispatcher. The token can then be queued once the lock is released.
    pub fn work_token(&self, index: usize) -> Result<Option<WorkToken>> {
        Ok(self.lock().frame(index)?.work_token().cloned())
    }

    /// See [`FrameMgrGuard::flush`].
    pub fn flush(&self) -> Result<()> {
        self.lock().flush()
    }

    /// Log the content of `state`, if enabled by the trace mask.
    pub fn print_queue(&self, state: FrameState) -> Result<()> {
        self.lock().print_queue(state)
    }

    /// Log the content of every queue enabled by the trace mask.
    pub fn print_all(&self) {
        self.lock().print_all()
    }

    /// Log the number of frames in each state.
    pub fn print_info(&self) {
        info!("{}", self);
    }
}

impl Display for FrameManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lock().write_info(f)
    }
}

/// Exclusive access to the pool of a [`FrameManager`].
///
/// The lock is released when the guard is dropped. Do not hold it across
/// anything that may block.
pub struct FrameMgrGuard<'a> {
    mgr: &'a FrameManager,
    pool: MutexGuard<'a, Pool>,
}

impl<'a> FrameMgrGuard<'a> {
    fn open(&mut self, buffer_count: usize, dispatcher: Option<Arc<dyn Dispatcher>>) -> Result<()> {
        if !self.pool.frames.is_empty() {
            debug!(
                "[{}] re-opened, releasing {} frames",
                self.mgr.name,
                self.pool.frames.len()
            );
            self.close();
        }

        if buffer_count == 0 {
            debug!("[{}] opened with no frames", self.mgr.name);
            return Ok(());
        }

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(buffer_count)
            .map_err(|_| FrameMgrError::AllocationFailed(buffer_count))?;
        for queue in self.pool.queues.iter_mut() {
            queue
                .try_reserve(buffer_count)
                .map_err(|_| FrameMgrError::AllocationFailed(buffer_count))?;
        }

        frames.extend((0..buffer_count).map(|index| {
            let work = dispatcher
                .as_ref()
                .map(|dispatcher| WorkToken::new(index, Arc::clone(dispatcher)));
            FrameDescriptor::new(index, work)
        }));
        self.pool.frames = frames;

        for index in 0..buffer_count {
            self.put(index, FrameState::Free)?;
        }

        debug!("[{}] opened with {} frames", self.mgr.name, buffer_count);

        Ok(())
    }

    fn close(&mut self) {
        if self.pool.frames.is_empty() {
            return;
        }

        for queue in self.pool.queues.iter_mut() {
            queue.clear();
        }
        self.pool.frames = Vec::new();

        debug!("[{}] closed", self.mgr.name);
    }

    pub fn pool_size(&self) -> usize {
        self.pool.frames.len()
    }

    pub fn count(&self, state: FrameState) -> Result<usize> {
        Ok(self.queue(state)?.count())
    }

    /// Insert untracked frame `index` into `state`.
    ///
    /// This is the only way to bring back a frame taken out with
    /// [`get`](Self::get), and how the pool is seeded at open time. A frame put
    /// back into the state it has been taken from returns to the head of the
    /// queue, so that `get` followed by `put` leaves the queue as it was.
    /// Otherwise the frame is appended at the tail.
    pub fn put(&mut self, index: usize, state: FrameState) -> Result<()> {
        self.insert(index, state, true)
    }

    fn insert(&mut self, index: usize, state: FrameState, restore: bool) -> Result<()> {
        let queue_index = state
            .queue_index()
            .ok_or(FrameMgrError::InvalidState(state))?;

        let Pool { frames, queues } = &mut *self.pool;
        let pool_size = frames.len();
        let frame = frames
            .get_mut(index)
            .ok_or(FrameMgrError::NullFrame { index, pool_size })?;

        if frame.state().is_valid() {
            return Err(FrameMgrError::AlreadyQueued {
                index,
                state: frame.state(),
            });
        }

        let at_head = restore && frame.taken_from() == Some(state);
        frame.set_state(state);
        if at_head {
            queues[queue_index].push_front(index);
            trace!("[{}] frame {} put back to {}", self.mgr.name, index, state);
        } else {
            queues[queue_index].push_back(index);
            trace!("[{}] frame {} put to {}", self.mgr.name, index, state);
        }

        Ok(())
    }

    /// Take the frame at the head of `state` out of its queue.
    ///
    /// The frame is left untracked (its state is `Invalid`) until it is given
    /// to [`put`](Self::put). Returns `None` if `state` is empty.
    pub fn get(&mut self, state: FrameState) -> Result<Option<usize>> {
        let queue_index = state
            .queue_index()
            .ok_or(FrameMgrError::InvalidState(state))?;

        let Pool { frames, queues } = &mut *self.pool;
        let index = match queues[queue_index].pop_front() {
            Some(index) => index,
            None => return Ok(None),
        };
        frames[index].take_from(state);

        trace!("[{}] frame {} taken from {}", self.mgr.name, index, state);

        Ok(Some(index))
    }

    /// Move frame `index` from its current queue to the tail of `state`.
    ///
    /// Moving a frame to the state it is already in is allowed and sends it to
    /// the tail of its queue. Entering `Process` snapshots the frame's
    /// `out_flags` into its `bak_flags`, unless the pool belongs to the
    /// hardware layer.
    pub fn trans(&mut self, index: usize, state: FrameState) -> Result<()> {
        let target = state
            .queue_index()
            .ok_or(FrameMgrError::InvalidState(state))?;

        let current = self.frame(index)?.state();
        let source = current
            .queue_index()
            .ok_or(FrameMgrError::InvalidState(current))?;

        if self.pool.queues[source].is_empty() {
            return Err(self.corrupted(FrameMgrError::EmptySource {
                index,
                state: current,
            }));
        }
        if !self.pool.queues[source].remove(index) {
            return Err(self.corrupted(FrameMgrError::NotQueued {
                index,
                state: current,
            }));
        }

        let backup = state == FrameState::Process && !self.mgr.id.is_hw();
        let frame = &mut self.pool.frames[index];
        frame.set_state(state);
        if backup {
            frame.backup_out_flags();
        }
        self.pool.queues[target].push_back(index);

        trace!(
            "[{}] frame {} {} -> {}",
            self.mgr.name,
            index,
            current,
            state
        );

        Ok(())
    }

    pub fn peek(&self, state: FrameState) -> Result<Option<usize>> {
        Ok(self.queue(state)?.peek_front())
    }

    pub fn peek_tail(&self, state: FrameState) -> Result<Option<usize>> {
        Ok(self.queue(state)?.peek_back())
    }

    /// Return the first frame of `state`, in FIFO order, matching `pred`.
    pub fn find<P>(&self, state: FrameState, mut pred: P) -> Result<Option<usize>>
    where
        P: FnMut(&FrameDescriptor) -> bool,
    {
        let queue = self.queue(state)?;
        let frames = &self.pool.frames;

        Ok(queue.find(|index| pred(&frames[index])))
    }

    pub fn frame(&self, index: usize) -> Result<&FrameDescriptor> {
        let pool_size = self.pool.frames.len();
        self.pool
            .frames
            .get(index)
            .ok_or(FrameMgrError::NullFrame { index, pool_size })
    }

    /// Mutable access to the metadata of frame `index`. The state of the frame
    /// cannot be changed this way.
    pub fn frame_mut(&mut self, index: usize) -> Result<&mut FrameDescriptor> {
        let pool_size = self.pool.frames.len();
        self.pool
            .frames
            .get_mut(index)
            .ok_or(FrameMgrError::NullFrame { index, pool_size })
    }

    /// Return every frame to `Free`.
    ///
    /// `Request`, `Process` and `Complete` are emptied in that order, each one
    /// from head to tail, so the frames end up in `Free` after the ones that
    /// were already there, grouped by their former state. Frames taken out
    /// with [`get`](Self::get) and never put back are reclaimed last.
    pub fn flush(&mut self) -> Result<()> {
        for state in &FrameState::QUEUES[1..] {
            while let Some(index) = self.get(*state)? {
                self.insert(index, FrameState::Free, false)?;
            }
        }

        let untracked: Vec<usize> = self
            .pool
            .frames
            .iter()
            .filter(|frame| !frame.state().is_valid())
            .map(|frame| frame.index())
            .collect();
        for index in untracked {
            warn!("[{}] frame {} was not tracked, reclaiming it", self.mgr.name, index);
            self.insert(index, FrameState::Free, false)?;
        }

        let num_free = self.count(FrameState::Free)?;
        if num_free != self.pool_size() {
            error!(
                "[{}] flush left {} free frames out of {}",
                self.mgr.name,
                num_free,
                self.pool_size()
            );
            self.dump_all();
        }
        debug_assert_eq!(num_free, self.pool_size());

        debug!("[{}] flushed {} frames", self.mgr.name, self.pool_size());

        Ok(())
    }

    /// Render the members of `state` as `index(Ffcount)` pairs.
    pub fn format_queue(&self, state: FrameState) -> Result<String> {
        let queue = self.queue(state)?;
        let mut out = format!("[{}] {}({}):", self.mgr.name, state, queue.count());

        for index in queue.iter() {
            let _ = write!(out, " {}(F{})", index, self.pool.frames[index].fcount);
        }

        Ok(out)
    }

    pub fn print_queue(&self, state: FrameState) -> Result<()> {
        if !self.mgr.trace_mask().traces(state) {
            // Still reject `Invalid`, which no mask ever traces.
            self.queue(state)?;
            return Ok(());
        }

        info!("{}", self.format_queue(state)?);

        Ok(())
    }

    pub fn print_all(&self) {
        for state in FrameState::QUEUES {
            // Cannot fail, these are all valid queue states.
            let _ = self.print_queue(state);
        }
    }

    fn write_info<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        write!(w, "[{}]", self.mgr.name)?;
        for state in FrameState::QUEUES {
            write!(w, " {}:{}", state, self.pool.queues[state as usize].count())?;
        }
        Ok(())
    }

    fn queue(&self, state: FrameState) -> Result<&StateQueue> {
        let queue_index = state
            .queue_index()
            .ok_or(FrameMgrError::InvalidState(state))?;

        Ok(&self.pool.queues[queue_index])
    }

    /// Dump every queue regardless of the trace mask.
    fn dump_all(&self) {
        for state in FrameState::QUEUES {
            if let Ok(line) = self.format_queue(state) {
                error!("{}", line);
            }
        }
    }

    /// Report a corruption of the pool accounting.
    fn corrupted(&self, err: FrameMgrError) -> FrameMgrError {
        error!("[{}] pool is corrupted: {}", self.mgr.name, err);
        self.dump_all();
        err
    }
}
