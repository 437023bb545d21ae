//! Shared thread pool for decode tasks.
//!
//! Uses work-stealing deques:
//! - External tasks go to a global injector
//! - Each worker drains its own deque, then the injector, then steals
//!
//! Readers never block a worker waiting on another task; every job runs to
//! completion and fulfills its own promise.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work-stealing worker pool.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// workers.execute(move || promise.fulfill(decoder.decode_video(time)));
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Jobs queued or running.
    active: Arc<AtomicUsize>,
}

impl Workers {
    /// Create pool with `num_threads` workers (at least one).
    ///
    /// Recommended: `num_cpus::get() * 3 / 4` (leave room for the host loop
    /// and the audio thread).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));

        let mut locals: Vec<Worker<Job>> = Vec::new();
        let mut stealers: Vec<Stealer<Job>> = Vec::new();
        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            locals.push(worker);
        }

        let mut handles = Vec::new();
        for (worker_id, worker) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let active = Arc::clone(&active);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("playa-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        let job = worker
                            .pop()
                            .or_else(|| injector.steal_batch_and_pop(&worker).success())
                            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

                        if let Some(job) = job {
                            job();
                            active.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        // Idle: short sleep to avoid CPU spin
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Worker {} stopped", worker_id);
                })
                .expect("Failed to spawn worker thread");
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Self {
            injector,
            handles,
            shutdown,
            active,
        }
    }

    /// Pool sized from the CPU count (`0` = auto).
    pub fn with_auto_threads(requested: usize) -> Self {
        let threads = if requested == 0 {
            (num_cpus::get() * 3 / 4).max(1)
        } else {
            requested
        };
        Self::new(threads)
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs queued or running.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Run closure on a worker thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Queued jobs still drain; 500ms total for all threads
        let deadline = Instant::now() + Duration::from_millis(500);
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}
