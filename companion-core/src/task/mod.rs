//! Tracks the spawned task of every in-flight call on a connection.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub type TaskEventSender = mpsc::Sender<TaskEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Finished(u64),
    Panicked(u64, String),
}

impl TaskEvent {
    pub fn call_id(&self) -> u64 {
        match self {
            TaskEvent::Finished(id) | TaskEvent::Panicked(id, _) => *id,
        }
    }
}

pub struct CallPool {
    tasks: HashMap<u64, JoinHandle<()>>,
    pool_rx: mpsc::Receiver<TaskEvent>,
    pool_tx: TaskEventSender,
}

impl CallPool {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(1024);
        Self {
            tasks: HashMap::new(),
            pool_rx,
            pool_tx,
        }
    }

    /// Spawn the task serving `call_id`. It reports [`TaskEvent::Finished`]
    /// on completion, or [`TaskEvent::Panicked`] if it panics.
    pub fn spawn<Fut>(&mut self, call_id: u64, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let event_tx = self.pool_tx.clone();
        let handle = tokio::spawn(async move {
            let event = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(()) => TaskEvent::Finished(call_id),
                Err(panic) => TaskEvent::Panicked(call_id, panic_message(panic.as_ref())),
            };
            let _ = event_tx.send(event).await;
        });
        self.tasks.insert(call_id, handle);
    }

    pub fn contains(&self, call_id: u64) -> bool {
        self.tasks.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.pool_rx.recv().await
    }

    /// Forget the finished task. Returns its call id.
    pub fn process_event(&mut self, event: &TaskEvent) -> u64 {
        let call_id = event.call_id();
        self.tasks.remove(&call_id);
        match event {
            TaskEvent::Finished(id) => debug!(call_id = id, "call task finished"),
            TaskEvent::Panicked(id, msg) => error!(call_id = id, panic = %msg, "call task panicked"),
        }
        call_id
    }

    /// Wait until every tracked task has reported.
    pub async fn join_all(&mut self) {
        while !self.tasks.is_empty() {
            match self.pool_rx.recv().await {
                Some(event) => {
                    self.process_event(&event);
                }
                None => break,
            }
        }
    }
}

impl Default for CallPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPool")
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_tasks_are_forgotten() {
        let mut pool = CallPool::new();
        pool.spawn(1, async {});
        pool.spawn(2, async {});
        assert_eq!(pool.len(), 2);

        pool.join_all().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn panics_are_reported() {
        let mut pool = CallPool::new();
        pool.spawn(7, async { panic!("boom") });
        let event = pool.recv().await.unwrap();
        assert_eq!(event, TaskEvent::Panicked(7, "boom".into()));
        assert_eq!(pool.process_event(&event), 7);
        assert!(!pool.contains(7));
    }
}
