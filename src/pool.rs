//! Worker thread pool.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A pool of worker threads executing submitted tasks concurrently.
///
/// The pool grows lazily: a new worker is spawned on submission only while
/// no existing worker is idle and the thread ceiling has not been reached.
/// Idle workers block on a condition variable. A panicking task is caught at
/// the worker boundary and logged; the worker then continues with the next
/// task.
///
/// Dropping the pool signals shutdown, wakes every worker and joins them.
/// Each worker finishes the task it is currently running; tasks still queued
/// at that point are discarded.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    max_thread_count: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    has_work: Condvar,
}

struct PoolState {
    queue: VecDeque<Task>,
    idle_threads: usize,
    thread_count: usize,
    shutdown: bool,
}

impl ThreadPool {
    /// Creates a pool that will grow up to `max_thread_count` workers.
    ///
    /// A ceiling of zero is treated as one so that submitted tasks can
    /// always make progress.
    pub fn new(max_thread_count: usize) -> Self {
        ThreadPool {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    idle_threads: 0,
                    thread_count: 0,
                    shutdown: false,
                }),
                has_work: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            max_thread_count: max_thread_count.max(1),
        }
    }

    /// Enqueues a task, spawning one more worker when all existing workers
    /// are busy and the ceiling allows it.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let spawn_worker = {
            let mut state = self.shared.state.lock().expect("pool state poisoned");
            state.queue.push_back(Box::new(task));
            let spawn = state.idle_threads == 0 && state.thread_count < self.max_thread_count;
            if spawn {
                state.thread_count += 1;
            }
            spawn
        };

        if spawn_worker {
            self.spawn_worker();
        }
        self.shared.has_work.notify_one();
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("tape-sort-worker".to_string())
            .spawn(move || worker_loop(&shared));

        match spawned {
            Ok(handle) => {
                self.workers.lock().expect("pool workers poisoned").push(handle);
            }
            Err(err) => {
                // The queued task stays for the remaining workers.
                log::error!("couldn't spawn a worker thread: {}", err);
                let mut state = self.shared.state.lock().expect("pool state poisoned");
                state.thread_count -= 1;
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().expect("pool state poisoned");
            state.shutdown = true;
        }
        self.shared.has_work.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().expect("pool workers poisoned"));
        for worker in workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock().expect("pool state poisoned");
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                state.idle_threads += 1;
                state = shared.has_work.wait(state).expect("pool state poisoned");
                state.idle_threads -= 1;
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            log::error!("unhandled panic in a pool task: {}", message);
        }
    }
}
