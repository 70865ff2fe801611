//! A fixed-size worker pool with deadlock-free nested waits.
//!
//! The driver's depth-first job expansion (see [`crate::graph`]) means a
//! worker thread can end up waiting on tasks that are still sitting in
//! the queue because every other worker is itself blocked on a wait. If
//! `wait_for_tasks` simply parked, that's a deadlock. Instead, a waiting
//! thread dequeues and runs ready work itself while it waits -- it
//! behaves like one more worker for the duration of the wait.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Opaque handle returned by [`TaskManager::add_task`] /
/// [`TaskManager::run_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Registered,
    Executing,
    Successful,
    Failed,
}

type Action = Box<dyn FnOnce() -> bool + Send + 'static>;

struct Entry {
    state: TaskState,
    action: Option<Action>,
}

struct Shared {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
    cond: Condvar,
    shutdown: std::sync::atomic::AtomicBool,
}

struct Inner {
    entries: std::collections::HashMap<u64, Entry>,
    queue: VecDeque<u64>,
}

/// A fixed-size pool of worker threads executing `Fn() -> bool` actions
/// (`true` = success). Dropping the manager joins every worker thread.
pub struct TaskManager {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl TaskManager {
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner { entries: std::collections::HashMap::new(), queue: VecDeque::new() }),
            cond: Condvar::new(),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });

        let workers = (0..num_workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueue `action`, returning its id immediately.
    pub fn add_task(&self, action: impl FnOnce() -> bool + Send + 'static) -> TaskId {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.shared.inner.lock().unwrap();
        inner.entries.insert(id, Entry { state: TaskState::Registered, action: Some(Box::new(action)) });
        inner.queue.push_back(id);
        self.shared.cond.notify_all();
        TaskId(id)
    }

    /// Semantically equivalent to [`Self::add_task`] at this layer; kept
    /// as a distinct name because callers use it to express intent
    /// ("this task is meant to be waited on synchronously soon").
    pub fn run_task(&self, action: impl FnOnce() -> bool + Send + 'static) -> TaskId {
        self.add_task(action)
    }

    /// Block until every task in `ids` has left the pool, running queued
    /// work inline on this thread if no worker is free. Returns whether
    /// every task in `ids` succeeded.
    pub fn wait_for_tasks(&self, ids: &[TaskId]) -> bool {
        loop {
            {
                let mut inner = self.shared.inner.lock().unwrap();
                if ids.iter().all(|id| is_terminal(&inner, id.0)) {
                    return ids.iter().all(|id| inner.entries.get(&id.0).map(|e| e.state == TaskState::Successful).unwrap_or(false));
                }

                if let Some(next) = inner.queue.pop_front() {
                    let action = inner.entries.get_mut(&next).and_then(|e| e.action.take());
                    inner.entries.get_mut(&next).unwrap().state = TaskState::Executing;
                    drop(inner);
                    if let Some(action) = action {
                        run_and_record(&self.shared, next, action);
                    }
                    continue;
                }

                // Nothing runnable right now; wait for a worker to finish
                // something, then recheck.
                let _unused = self.shared.cond.wait(inner).unwrap();
            }
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn is_terminal(inner: &Inner, id: u64) -> bool {
    matches!(inner.entries.get(&id).map(|e| e.state), Some(TaskState::Successful) | Some(TaskState::Failed))
}

fn run_and_record(shared: &Arc<Shared>, id: u64, action: Action) {
    let ok = std::panic::catch_unwind(std::panic::AssertUnwindSafe(action)).unwrap_or(false);
    let mut inner = shared.inner.lock().unwrap();
    if let Some(entry) = inner.entries.get_mut(&id) {
        entry.state = if ok { TaskState::Successful } else { TaskState::Failed };
    }
    shared.cond.notify_all();
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let (id, action) = {
            let mut inner = shared.inner.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) && inner.queue.is_empty() {
                    return;
                }
                if let Some(next) = inner.queue.pop_front() {
                    let action = inner.entries.get_mut(&next).and_then(|e| e.action.take());
                    if let Some(action) = action {
                        inner.entries.get_mut(&next).unwrap().state = TaskState::Executing;
                        break (next, action);
                    }
                    continue;
                }
                inner = shared.cond.wait(inner).unwrap();
            }
        };

        run_and_record(&shared, id, action);
    }
}
