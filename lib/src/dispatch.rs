//! Hand-off of frames to the hardware scheduler.
//!
//! A [`FrameManager`](crate::FrameManager) opened with a [`Dispatcher`] binds
//! one [`WorkToken`] to each of its frames. When the scheduler decides that a
//! frame is ready for the hardware, it moves the frame to `Process`, takes the
//! frame's token and queues it. The manager itself never calls the dispatcher
//! and has no idea of what processing a frame means.
//!
//! [`WorkerPool`] is a ready-made dispatcher that runs a handler on a set of
//! worker threads.

use std::fmt;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

/// Receiver of frames ready for the hardware.
pub trait Dispatcher: Send + Sync {
    /// Schedule the processing of frame `index`. This is called by the owner
    /// of the frame, never with the frame manager's lock held, and must not
    /// block on the hardware.
    fn dispatch(&self, index: usize) -> anyhow::Result<()>;
}

impl<F> Dispatcher for F
where
    F: Fn(usize) -> anyhow::Result<()> + Send + Sync,
{
    fn dispatch(&self, index: usize) -> anyhow::Result<()> {
        self(index)
    }
}

/// Work item bound to a frame at open time.
///
/// Cloning a token is cheap and all clones dispatch the same frame to the same
/// dispatcher.
#[derive(Clone)]
pub struct WorkToken {
    index: usize,
    dispatcher: Arc<dyn Dispatcher>,
}

impl WorkToken {
    pub(crate) fn new(index: usize, dispatcher: Arc<dyn Dispatcher>) -> Self {
        WorkToken { index, dispatcher }
    }

    /// Index of the frame this token has been bound to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand the frame over to the dispatcher.
    pub fn queue(&self) -> anyhow::Result<()> {
        self.dispatcher.dispatch(self.index)
    }
}

impl fmt::Debug for WorkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkToken")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// A [`Dispatcher`] that processes frames on a fixed set of worker threads.
///
/// Frames are picked by the first idle worker in the order they have been
/// dispatched. Errors returned by the handler are logged and otherwise
/// ignored: it is up to the handler to move the frame to a state that reflects
/// the failure.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<usize>>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `nr_workers` threads running `handler` for every dispatched frame.
    pub fn new<F>(name: &str, nr_workers: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(usize) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel::<usize>();
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(nr_workers);
        for i in 0..nr_workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let thread_name = format!("{}-{}", name, i);

            let worker = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || loop {
                    // Only hold the receiver while waiting, so other workers can
                    // pick the next frame while we process this one.
                    let index = match receiver.lock().unwrap().recv() {
                        Ok(index) => index,
                        // All senders are gone, the pool is being dropped.
                        Err(_) => break,
                    };

                    if let Err(e) = (*handler)(index) {
                        error!("{}: processing of frame {} failed: {:#}", thread_name, index, e);
                    }
                })?;
            workers.push(worker);
        }

        debug!("{}: started {} workers", name, workers.len());

        Ok(WorkerPool {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, index: usize) -> anyhow::Result<()> {
        let sender = self.sender.lock().unwrap();
        let sender = sender
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("{}: worker pool is shutting down", self.name))?;

        sender
            .send(index)
            .map_err(|_| anyhow::anyhow!("{}: all workers are gone", self.name))
    }
}

impl Drop for WorkerPool {
    /// Close the channel and wait for the workers to drain it.
    fn drop(&mut self) {
        self.sender.lock().unwrap().take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("{}: a worker thread panicked", self.name);
            }
        }

        debug!("{}: all workers stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_dispatcher() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(move |index: usize| -> anyhow::Result<()> {
            seen_cb.lock().unwrap().push(index);
            Ok(())
        });

        let token = WorkToken::new(3, Arc::clone(&dispatcher));
        assert_eq!(token.index(), 3);
        token.queue().unwrap();
        token.clone().queue().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_failing_dispatcher() {
        let token = WorkToken::new(
            0,
            Arc::new(|_: usize| -> anyhow::Result<()> { anyhow::bail!("hardware is gone") }),
        );
        assert!(token.queue().is_err());
    }

    #[test]
    fn test_worker_pool() {
        const NUM_FRAMES: usize = 64;

        let processed = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicUsize::new(0));

        {
            let processed = Arc::clone(&processed);
            let sum = Arc::clone(&sum);
            let pool = WorkerPool::new("test-pool", 4, move |index| {
                sum.fetch_add(index, Ordering::SeqCst);
                processed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
            assert_eq!(pool.num_workers(), 4);

            for i in 0..NUM_FRAMES {
                pool.dispatch(i).unwrap();
            }
            // Dropping the pool waits for all dispatched frames to be processed.
        }

        assert_eq!(processed.load(Ordering::SeqCst), NUM_FRAMES);
        assert_eq!(sum.load(Ordering::SeqCst), (0..NUM_FRAMES).sum::<usize>());
    }

    #[test]
    fn test_worker_pool_handler_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            let pool = WorkerPool::new("failing-pool", 1, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("programming failed")
            })
            .unwrap();

            // Errors do not kill the workers.
            pool.dispatch(0).unwrap();
            pool.dispatch(1).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
