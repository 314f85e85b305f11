//! Bounded FIFO request queue.
//!
//! Serializes model-backed request processing for bot-style orchestrators:
//! items dequeue in arrival order, at most `max_workers` are active at
//! once, and `close` wakes every waiter. A closed, drained queue hands out
//! `None` so worker loops can exit.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    active_jobs: usize,
    closed: bool,
}

pub struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
    max_workers: usize,
}

impl<T> RequestQueue<T> {
    pub fn new(max_workers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                active_jobs: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            max_workers: max_workers.max(1),
        }
    }

    /// Appends an item and returns its 1-based queue position.
    pub fn enqueue(&self, item: T) -> usize {
        let mut state = self.lock();
        state.items.push_back(item);
        let position = state.items.len();
        self.cond.notify_one();
        position
    }

    /// Blocks until an item is available and a worker slot is free.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.closed && state.items.is_empty() {
                return None;
            }
            if !state.items.is_empty() && state.active_jobs < self.max_workers {
                state.active_jobs += 1;
                return state.items.pop_front();
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Releases a worker slot taken by `dequeue`.
    pub fn mark_complete(&self) {
        let mut state = self.lock();
        state.active_jobs = state.active_jobs.saturating_sub(1);
        self.cond.notify_one();
    }

    /// `(queued, active)` counts.
    pub fn status(&self) -> (usize, usize) {
        let state = self.lock();
        (state.items.len(), state.active_jobs)
    }

    /// Closes the queue and wakes all waiters. Items already queued can
    /// still be drained.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = RequestQueue::new(1);
        assert_eq!(queue.enqueue("a"), 1);
        assert_eq!(queue.enqueue("b"), 2);
        assert_eq!(queue.enqueue("c"), 3);

        assert_eq!(queue.dequeue(), Some("a"));
        queue.mark_complete();
        assert_eq!(queue.dequeue(), Some("b"));
        queue.mark_complete();
        assert_eq!(queue.dequeue(), Some("c"));
    }

    #[test]
    fn closed_and_empty_returns_none() {
        let queue: RequestQueue<u32> = RequestQueue::new(2);
        queue.close();
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn close_drains_pending_items_first() {
        let queue = RequestQueue::new(2);
        queue.enqueue(1);
        queue.close();
        assert_eq!(queue.dequeue(), Some(1));
        queue.mark_complete();
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn close_wakes_blocked_workers() {
        let queue: Arc<RequestQueue<u32>> = Arc::new(RequestQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.dequeue())
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn active_jobs_bound_concurrency() {
        let queue = Arc::new(RequestQueue::new(2));
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_some());
        assert_eq!(queue.status(), (1, 2));

        // Both slots busy: a third dequeue must wait for a completion.
        let blocked = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.dequeue())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        queue.mark_complete();
        assert_eq!(blocked.join().unwrap(), Some(3));
        assert_eq!(queue.status(), (0, 2));
    }
}
