//! Fixed worker pool for parallel fact-table queries.
//!
//! The cache manager never blocks on SQL; it hands work to this pool and
//! returns futures. Workers run submitted jobs to completion; shutdown
//! closes the queue and joins every worker.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use starcache_error::{Result, StarCacheError};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of SQL worker threads.
pub struct SqlPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlPool")
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl SqlPool {
    /// Spawn a pool of `size` workers.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let workers = (0..size.max(1))
            .map(|worker| {
                let rx: Receiver<Job> = rx.clone();
                std::thread::Builder::new()
                    .name(format!("starcache-sql-{worker}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                        debug!(worker, "sql worker stopped");
                    })
                    .expect("spawning a sql worker thread")
            })
            .collect();
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job. Fails with `Shutdown` once the pool has stopped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(StarCacheError::Shutdown);
        };
        tx.send(Box::new(job)).map_err(|_| StarCacheError::Shutdown)
    }

    /// Close the queue and join the workers. Idempotent.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for SqlPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
