//! The work queue feeding the classification workers

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct QueueState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// FIFO queue guarded by one mutex and a condition variable. Workers
/// block in [`JobQueue::dequeue_or_wait`] until work arrives or the
/// queue is closed for shutdown.
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an entry and wake one waiter. Returns false when the queue
    /// has been closed.
    pub fn enqueue(&self, entry: T) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        state.queue.push_back(entry);
        self.available.notify_one();
        true
    }

    /// Pop the head without blocking.
    pub fn dequeue(&self) -> Option<T> {
        self.state.lock().unwrap().queue.pop_front()
    }

    /// Pop the head, blocking while the queue is empty. The wait loops on
    /// the condition, so spurious wakeups just retry. Returns None once
    /// the queue is closed and drained.
    pub fn dequeue_or_wait(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(entry) = state.queue.pop_front() {
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Close the queue and wake every waiter. Entries already queued can
    /// still be drained.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    /// Drop everything still queued and wake every waiter.
    pub fn clear(&self) {
        self.state.lock().unwrap().queue.clear();
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn dequeue_returns_none_when_empty() {
        let queue: JobQueue<u32> = JobQueue::new();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn entries_come_out_in_fifo_order() {
        let queue = JobQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
    }

    #[test]
    fn dequeue_or_wait_blocks_until_an_entry_arrives() {
        let queue: Arc<JobQueue<u32>> = Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_or_wait())
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(42);
        assert_eq!(waiter.join().unwrap(), Some(42));
    }

    #[test]
    fn close_releases_blocked_waiters() {
        let queue: Arc<JobQueue<u32>> = Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_or_wait())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn closed_queues_still_drain() {
        let queue = JobQueue::new();
        queue.enqueue(1);
        queue.close();
        assert!(!queue.enqueue(2));
        assert_eq!(queue.dequeue_or_wait(), Some(1));
        assert_eq!(queue.dequeue_or_wait(), None);
    }
}
