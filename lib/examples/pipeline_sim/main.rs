//! Simulates a capture session: a video node queueing and dequeueing buffers,
//! a scheduler pushing frames to the hardware through a worker pool, and an
//! interrupt thread reporting completion by frame count.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use clap::{Arg, Command};
use log::{debug, info, warn};

use framemgr::{Dispatcher, FrameManager, FrameMgrId, FrameState, WorkerPool};

/// Signaled every time a frame reaches `Complete`.
type CompletionSignal = Arc<(Mutex<()>, Condvar)>;

fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T {
    matches
        .value_of(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| panic!("Invalid value for {}", name))
}

fn main() {
    env_logger::init();

    let matches = Command::new("Frame manager pipeline simulation")
        .arg(
            Arg::new("num_buffers")
                .long("buffers")
                .takes_value(true)
                .default_value("8")
                .help("Number of buffers in the pool"),
        )
        .arg(
            Arg::new("num_workers")
                .long("workers")
                .takes_value(true)
                .default_value("2")
                .help("Number of threads programming the hardware"),
        )
        .arg(
            Arg::new("num_frames")
                .long("stop_after")
                .takes_value(true)
                .default_value("100")
                .help("Stop after capturing a given number of frames"),
        )
        .arg(
            Arg::new("latency")
                .long("latency_ms")
                .takes_value(true)
                .default_value("5")
                .help("Simulated hardware processing time, in milliseconds"),
        )
        .get_matches();

    let num_buffers: usize = parse_arg(&matches, "num_buffers");
    let num_workers: usize = parse_arg(&matches, "num_workers");
    let num_frames: u64 = parse_arg(&matches, "num_frames");
    let latency = Duration::from_millis(parse_arg(&matches, "latency"));

    let lets_quit = Arc::new(AtomicBool::new(false));
    // Setup the Ctrl+c handler.
    {
        let lets_quit_handler = lets_quit.clone();
        ctrlc::set_handler(move || {
            lets_quit_handler.store(true, Ordering::SeqCst);
        })
        .expect("Failed to set Ctrl-C handler.");
    }

    let mgr = Arc::new(FrameManager::new(FrameMgrId::SHOT, "video0"));
    let completion: CompletionSignal = Arc::new((Mutex::new(()), Condvar::new()));

    // The interrupt context: the hardware reports completed frames by their
    // frame count.
    let (irq_tx, irq_rx) = mpsc::channel::<u64>();
    let irq_thread = {
        let mgr = Arc::clone(&mgr);
        let completion = Arc::clone(&completion);
        thread::Builder::new()
            .name("irq".into())
            .spawn(move || {
                while let Ok(fcount) = irq_rx.recv() {
                    // Look up and complete under the same lock, so a concurrent
                    // flush cannot slip in between.
                    let mut guard = mgr.lock();
                    match guard.find(FrameState::Process, |frame| frame.fcount == fcount) {
                        Ok(Some(index)) => {
                            guard
                                .trans(index, FrameState::Complete)
                                .expect("Failed to complete frame");
                            drop(guard);
                            let _lock = completion.0.lock().unwrap();
                            completion.1.notify_all();
                        }
                        Ok(None) => warn!("[F{}] no frame in process, flushed?", fcount),
                        Err(e) => panic!("Failed to look up frame: {}", e),
                    }
                }
            })
            .expect("Failed to spawn interrupt thread")
    };

    // The workers programming the hardware for each dispatched frame.
    let workers = {
        let mgr = Arc::clone(&mgr);
        let irq_tx = Mutex::new(irq_tx);
        WorkerPool::new("hw-worker", num_workers, move |index| {
            let fcount = mgr.frame(index)?.fcount;
            thread::sleep(latency);
            mgr.update_frame(index, |frame| frame.out_flags = 0)?;
            irq_tx
                .lock()
                .unwrap()
                .send(fcount)
                .map_err(|_| anyhow!("interrupt thread is gone"))
        })
        .expect("Failed to start worker pool")
    };
    let workers = Arc::new(workers);

    mgr.open_with_dispatcher(num_buffers, Arc::clone(&workers) as Arc<dyn Dispatcher>)
        .expect("Failed to open frame manager");

    // The group scheduler: moves requested frames to the hardware.
    let streaming = Arc::new(AtomicBool::new(true));
    let scheduler_thread = {
        let mgr = Arc::clone(&mgr);
        let streaming = Arc::clone(&streaming);
        thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || {
                while streaming.load(Ordering::SeqCst) {
                    let token = {
                        let mut guard = mgr.lock();
                        match guard.peek(FrameState::Request).unwrap() {
                            Some(index) => {
                                guard.frame_mut(index).unwrap().out_flags = 0b1;
                                guard.trans(index, FrameState::Process).unwrap();
                                guard.frame(index).unwrap().work_token().cloned()
                            }
                            None => None,
                        }
                    };

                    match token {
                        Some(token) => {
                            if let Err(e) = token.queue() {
                                warn!("Failed to dispatch frame {}: {:#}", token.index(), e);
                            }
                        }
                        None => thread::sleep(Duration::from_millis(1)),
                    }
                }
            })
            .expect("Failed to spawn scheduler thread")
    };

    // The video node: qbuf every free buffer, dqbuf completed ones.
    let start = Instant::now();
    let mut queued = 0u64;
    let mut dequeued = 0u64;
    while dequeued < num_frames && !lets_quit.load(Ordering::SeqCst) {
        while queued < num_frames {
            let mut guard = mgr.lock();
            let index = match guard.peek(FrameState::Free).unwrap() {
                Some(index) => index,
                None => break,
            };
            guard.frame_mut(index).unwrap().fcount = queued;
            guard.trans(index, FrameState::Request).unwrap();
            queued += 1;
        }

        let (lock, cvar) = &*completion;
        let mut signal = lock.lock().unwrap();
        while mgr.count(FrameState::Complete).unwrap() == 0 {
            let (s, timeout) = cvar
                .wait_timeout(signal, Duration::from_millis(100))
                .unwrap();
            signal = s;
            if timeout.timed_out() {
                break;
            }
        }
        drop(signal);

        loop {
            let mut guard = mgr.lock();
            let index = match guard.get(FrameState::Complete).unwrap() {
                Some(index) => index,
                None => break,
            };

            let frame = guard.frame(index).unwrap();
            if !frame.outputs_done() {
                warn!(
                    "[F{}] outputs 0x{:x} were dropped by the hardware",
                    frame.fcount,
                    frame.dropped_outputs()
                );
            }
            debug!("[F{}] dequeued buffer {}", frame.fcount, index);
            guard.put(index, FrameState::Free).unwrap();
            dequeued += 1;
        }
    }

    let elapsed = start.elapsed();
    info!(
        "Captured {} frames in {:.2}s ({:.2} fps)",
        dequeued,
        elapsed.as_secs_f64(),
        dequeued as f64 / elapsed.as_secs_f64()
    );

    // streamoff
    streaming.store(false, Ordering::SeqCst);
    scheduler_thread.join().expect("Scheduler thread panicked");
    mgr.print_all();
    mgr.flush().expect("Failed to flush frame manager");
    mgr.print_info();

    // Releasing the pool drops the work tokens, and with them the last
    // references to the worker pool besides ours.
    mgr.close();
    drop(workers);
    irq_thread.join().expect("Interrupt thread panicked");
}
