use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::types::TaskId;

/// FIFO of "run now" task ids. In-memory only; rebuilt from the store on
/// startup.
#[derive(Default)]
pub struct ImmediateQueue {
    items: Mutex<VecDeque<TaskId>>,
    notify: Notify,
}

impl ImmediateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<TaskId>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `id`. Returns `false` if it is already queued.
    pub fn push(&self, id: TaskId) -> bool {
        {
            let mut items = self.items();
            if items.contains(&id) {
                return false;
            }
            items.push_back(id);
        }
        self.notify.notify_one();
        true
    }

    /// Put a deferred task back at the head so it keeps its turn.
    pub fn push_front(&self, id: TaskId) {
        {
            let mut items = self.items();
            if items.contains(&id) {
                return;
            }
            items.push_front(id);
        }
        self.notify.notify_one();
    }

    pub fn remove(&self, id: &TaskId) -> bool {
        let mut items = self.items();
        let before = items.len();
        items.retain(|queued| queued != id);
        items.len() != before
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TaskId> {
        self.items().iter().cloned().collect()
    }

    /// Wait up to `wait` for the next id.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<TaskId> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register interest before checking so a push between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(id) = self.items().pop_front() {
                return Some(id);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.items().pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_without_duplicates() {
        let q = ImmediateQueue::new();
        assert!(q.push(TaskId::from("a")));
        assert!(q.push(TaskId::from("b")));
        assert!(!q.push(TaskId::from("a")));
        q.push_front(TaskId::from("c"));
        assert_eq!(
            q.snapshot(),
            vec![TaskId::from("c"), TaskId::from("a"), TaskId::from("b")]
        );
        assert!(q.remove(&TaskId::from("a")));
        assert!(!q.remove(&TaskId::from("a")));
        assert_eq!(q.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_when_empty() {
        let q = ImmediateQueue::new();
        assert_eq!(q.pop_timeout(Duration::from_secs(60)).await, None);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pop_wakes_on_push() {
        let q = Arc::new(ImmediateQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop_timeout(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        q.push(TaskId::from("late"));
        assert_eq!(waiter.await.unwrap(), Some(TaskId::from("late")));
    }
}
