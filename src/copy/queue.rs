//! Ready queue shared by the copy workers.
//!
//! A task becomes ready once the task it depends on has completed. Workers
//! pull ready tasks in plan order and park on a [`Notify`] while everything
//! left is still gated.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use super::plan::CopyTask;

#[derive(Debug)]
struct QueueState {
    ready: VecDeque<usize>,
    dependents: Vec<Vec<usize>>,
    remaining: usize,
    in_flight: usize,
    cancelled: bool,
}

#[derive(Debug)]
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub(crate) fn new(tasks: &[CopyTask]) -> Self {
        let mut ready = VecDeque::new();
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (index, task) in tasks.iter().enumerate() {
            match task.depends_on {
                Some(parent) => dependents[parent].push(index),
                None => ready.push_back(index),
            }
        }

        Self {
            state: Mutex::new(QueueState {
                ready,
                dependents,
                remaining: tasks.len(),
                in_flight: 0,
                cancelled: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Next ready task, or `None` once the queue is drained or cancelled.
    pub(crate) async fn next(&self) -> Option<usize> {
        loop {
            // Registered before the check so a completion in between is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.cancelled || state.remaining == 0 {
                    return None;
                }
                if let Some(index) = state.ready.pop_front() {
                    state.in_flight += 1;
                    return Some(index);
                }
                if state.in_flight == 0 {
                    // Nothing running can unlock what is left.
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a task done and release the tasks waiting on it.
    pub(crate) fn complete(&self, index: usize) {
        {
            let mut state = self.state.lock();
            state.remaining -= 1;
            state.in_flight -= 1;
            let released = std::mem::take(&mut state.dependents[index]);
            state.ready.extend(released);
        }
        self.notify.notify_waiters();
    }

    /// Stop handing out tasks. Tasks already handed out still run.
    pub(crate) fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.notify.notify_waiters();
    }

    /// Tasks not yet completed.
    pub(crate) fn remaining(&self) -> usize {
        self.state.lock().remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::plan::TaskKind;

    fn dir(depends_on: Option<usize>) -> CopyTask {
        CopyTask {
            remote_path: String::new(),
            kind: TaskKind::CreateDir,
            depends_on,
        }
    }

    #[tokio::test]
    async fn test_dependents_wait_for_parent() {
        let queue = TaskQueue::new(&[dir(None), dir(Some(0)), dir(Some(0)), dir(Some(1))]);

        assert_eq!(queue.next().await, Some(0));
        queue.complete(0);
        assert_eq!(queue.next().await, Some(1));
        assert_eq!(queue.next().await, Some(2));
        queue.complete(2);
        queue.complete(1);
        assert_eq!(queue.next().await, Some(3));
        queue.complete(3);
        assert_eq!(queue.next().await, None);
        assert_eq!(queue.remaining(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let queue = TaskQueue::new(&[dir(None), dir(None)]);
        assert_eq!(queue.next().await, Some(0));
        queue.cancel();
        assert_eq!(queue.next().await, None);
        assert_eq!(queue.remaining(), 2);
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken() {
        let queue = std::sync::Arc::new(TaskQueue::new(&[dir(None), dir(Some(0))]));
        assert_eq!(queue.next().await, Some(0));

        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.complete(0);
        assert_eq!(waiter.await.unwrap(), Some(1));
    }
}
