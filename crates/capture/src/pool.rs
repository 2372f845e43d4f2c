//! Fixed-size pool of worker threads for capture tasks.
//!
//! Workers block on a shared unbounded queue. A task that panics (or, for
//! [`WorkerPool::submit`], returns an error) is logged and the worker moves on
//! to the next one.
//!
//! Shutdown is cooperative: [`WorkerPool::terminate`] drops whatever is still
//! queued and then sends one `Terminate` job per worker. Each worker exits
//! after finishing the task it is running, however long that takes.

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use exn::ResultExt;

use crate::error::{ErrorKind, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Terminate,
}

/// Decrements the live worker count when a worker thread ends, including by
/// unwinding.
struct AliveGuard(Arc<AtomicUsize>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Sender<Job>,
    // Kept so `terminate` can drain jobs no worker has picked up yet.
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    alive: Arc<AtomicUsize>,
    terminated: AtomicBool,
}

impl WorkerPool {
    /// Start `size` workers. A size of zero is raised to one.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let alive = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            alive.fetch_add(1, Ordering::SeqCst);
            let guard = AliveGuard(Arc::clone(&alive));
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || work(receiver, guard))
                .or_raise(|| ErrorKind::Spawn)?;
            workers.push(handle);
        }
        tracing::debug!(pool = %name, size, "started worker pool");
        Ok(Self {
            name,
            size,
            sender,
            receiver,
            workers: Mutex::new(workers),
            alive,
            terminated: AtomicBool::new(false),
        })
    }

    /// Queue a task. Never blocks.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.terminated.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Terminated);
        }
        // The rejected job holds a non-`Sync` closure, so it can't travel as a source.
        if self.sender.send(Job::Run(Box::new(task))).is_err() {
            exn::bail!(ErrorKind::Terminated);
        }
        Ok(())
    }

    /// Queue a fallible task; an `Err` it returns is logged.
    pub fn submit<F, E>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Debug,
    {
        self.execute(move || {
            if let Err(err) = task() {
                tracing::error!(error = ?err, "task failed");
            }
        })
    }

    /// Stop accepting tasks, drop the queued ones, and ask every worker to
    /// exit once its current task is done. Calling it again does nothing.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.receiver.try_iter().count();
        for _ in 0..self.size {
            // Cannot fail: `self.receiver` keeps the channel open.
            let _ = self.sender.send(Job::Terminate);
        }
        tracing::debug!(pool = %self.name, dropped, "terminating worker pool");
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        if self.terminated.load(Ordering::SeqCst) {
            return 0;
        }
        self.receiver.len()
    }

    /// Worker threads that haven't exited yet.
    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for every worker to exit. Only returns after [`terminate`](Self::terminate).
    pub fn join(&self) {
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn work(receiver: Receiver<Job>, _guard: AliveGuard) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Terminate => break,
            Job::Run(task) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(panic = %message, "task panicked");
                }
            },
        }
    }
    tracing::trace!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Queue `count` tasks that each count themselves as started and then
    /// block until released.
    fn queue_blocking(pool: &WorkerPool, count: usize, started: &Arc<AtomicUsize>, release: &Receiver<()>) {
        for _ in 0..count {
            let started = Arc::clone(started);
            let release = release.clone();
            pool.execute(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = release.recv();
            })
            .unwrap();
        }
    }

    #[test]
    fn test_runs_at_most_pool_size() {
        let pool = WorkerPool::new("test", 5).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = unbounded();
        queue_blocking(&pool, 10, &started, &release_rx);

        wait_until("five running", || started.load(Ordering::SeqCst) == 5);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(started.load(Ordering::SeqCst), 5);
        assert_eq!(pool.queued(), 5);

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        wait_until("eight started", || started.load(Ordering::SeqCst) == 8);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(started.load(Ordering::SeqCst), 8);
        assert_eq!(pool.queued(), 2);

        drop(release_tx);
        pool.terminate();
        pool.join();
        assert_eq!(pool.alive(), 0);
    }

    #[test]
    fn test_terminate_waits_for_running_tasks() {
        let pool = WorkerPool::new("test", 5).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = unbounded();
        queue_blocking(&pool, 3, &started, &release_rx);
        wait_until("three running", || started.load(Ordering::SeqCst) == 3);

        pool.terminate();
        wait_until("idle workers to exit", || pool.alive() == 3);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.alive(), 3);

        release_tx.send(()).unwrap();
        wait_until("one more exit", || pool.alive() == 2);
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        pool.join();
        assert_eq!(pool.alive(), 0);
    }

    #[test]
    fn test_terminate_drops_queued_tasks() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = unbounded();
        queue_blocking(&pool, 4, &started, &release_rx);
        wait_until("first running", || started.load(Ordering::SeqCst) == 1);

        pool.terminate();
        pool.terminate();
        assert_eq!(pool.queued(), 0);
        assert!(matches!(&*pool.execute(|| {}).unwrap_err(), ErrorKind::Terminated));

        release_tx.send(()).unwrap();
        pool.join();
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_tasks_do_not_kill_workers() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        pool.execute(|| panic!("bad message")).unwrap();
        pool.submit(|| Err::<(), _>("not html")).unwrap();
        let flag = Arc::clone(&done);
        pool.execute(move || flag.store(true, Ordering::SeqCst)).unwrap();

        wait_until("last task", || done.load(Ordering::SeqCst));
        assert_eq!(pool.alive(), 1);
        pool.terminate();
        pool.join();
    }
}
