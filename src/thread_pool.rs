/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A fixed set of worker threads that run jobs from a bounded queue.
//!
//! Submitting a job blocks while the queue is full. When the pool is dropped, the queue is closed, the jobs
//! already queued are still run, and the workers are joined.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    jobs: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `size` workers sharing a queue of at most `queue_capacity` waiting jobs.
    ///
    /// # Panics
    /// `size` must be non-zero.
    pub fn new(size: usize, queue_capacity: usize) -> ThreadPool {
        assert!(size > 0, "Programming error: a thread pool needs at least one worker.");

        let (jobs, queue) = mpsc::sync_channel::<Job>(queue_capacity);
        let queue = Arc::new(Mutex::new(queue));
        let workers = (0..size)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || run_worker(queue))
            })
            .collect();

        ThreadPool {
            jobs: Some(jobs),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` to be run by the next free worker. Returns false, dropping the job, if the pool has shut down.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) -> bool {
        let submitted = self
            .jobs
            .as_ref()
            .map_or(false, |jobs| jobs.send(Box::new(job)).is_ok());
        if !submitted {
            log::warn!("Dropped a job submitted to a thread pool that has shut down");
        }
        submitted
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the queue makes every worker return once it is drained.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn run_worker(queue: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = queue.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match job {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("A job panicked in a thread pool worker");
                }
            }
            Err(_) => return,
        }
    }
}
