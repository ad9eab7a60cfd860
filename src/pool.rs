//! A bounded worker thread pool with a rate-limited task counter:
//! `crossbeam_channel` backs the work queue and `parking_lot` backs the
//! task counter's wait/notify.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads pulling closures off a shared queue.
/// Dropping the pool joins every worker after the queue drains.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..num_threads.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
            })
            .collect();
        Self { sender: Some(sender), workers }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// No limit on the number of tasks a [`TaskCounter`] may have in flight at
/// once, matching `ThreadPool::kNoLimit` in the C++ original.
pub const NO_LIMIT: usize = usize::MAX;

/// Tracks outstanding work submitted to a [`ThreadPool`], optionally
/// rate-limiting how many tasks may be in flight at once, and lets a caller
/// block until every submitted task has run its completion callback.
pub struct TaskCounter {
    pool: Arc<ThreadPool>,
    rate_limit: usize,
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl TaskCounter {
    pub fn new(pool: Arc<ThreadPool>, rate_limit: usize) -> Self {
        Self { pool, rate_limit, state: Arc::new((Mutex::new(0), Condvar::new())) }
    }

    pub fn unlimited(pool: Arc<ThreadPool>) -> Self {
        Self::new(pool, NO_LIMIT)
    }

    /// Submits `task`, running `on_done(result)` on the worker thread once
    /// `task` completes. Blocks the caller only when `rate_limit` in-flight
    /// tasks are already outstanding.
    pub fn submit<T, F, D>(&self, task: F, on_done: D)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let (lock, cvar) = &*self.state;
        {
            let mut in_flight = lock.lock();
            while *in_flight >= self.rate_limit {
                cvar.wait(&mut in_flight);
            }
            *in_flight += 1;
        }
        let state = Arc::clone(&self.state);
        self.pool.submit(move || {
            let result = task();
            on_done(result);
            let (lock, cvar) = &*state;
            let mut in_flight = lock.lock();
            *in_flight -= 1;
            cvar.notify_all();
        });
    }

    /// Blocks until every task submitted so far has completed.
    pub fn wait_until_complete(&self) {
        let (lock, cvar) = &*self.state;
        let mut in_flight = lock.lock();
        while *in_flight > 0 {
            cvar.wait(&mut in_flight);
        }
    }
}

impl Drop for TaskCounter {
    fn drop(&mut self) {
        self.wait_until_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn submitted_tasks_all_complete_before_wait_returns() {
        let pool = Arc::new(ThreadPool::new(4));
        let counter = TaskCounter::unlimited(Arc::clone(&pool));
        let total = Arc::new(AtomicI32::new(0));
        for i in 0..100 {
            let total = Arc::clone(&total);
            counter.submit(move || i, move |i| {
                total.fetch_add(i, Ordering::SeqCst);
            });
        }
        counter.wait_until_complete();
        assert_eq!(total.load(Ordering::SeqCst), (0..100).sum());
    }

    #[test]
    fn rate_limit_caps_in_flight_tasks() {
        let pool = Arc::new(ThreadPool::new(4));
        let counter = TaskCounter::new(Arc::clone(&pool), 2);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            counter.submit(
                move || {
                    let n = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(n, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    current.fetch_sub(1, Ordering::SeqCst);
                },
                |_| {},
            );
        }
        counter.wait_until_complete();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
