//! Single-shot completion primitive.
//!
//! [`completion`] returns a cloneable [`Completer`] and a [`Settlement`].
//! Any number of producers may race to call [`Completer::settle`]; the
//! first one wins and every later attempt is a no-op that returns `false`.
//! The sender half lives behind a mutex as an `Option` and is taken on the
//! winning call, so a second delivery cannot happen.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// Create a linked completer / settlement pair.
pub fn completion<T>() -> (Completer<T>, Settlement<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Settlement { rx },
    )
}

/// Producer side. Clone it into every completion source.
pub struct Completer<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completer<T> {
    /// Settle with `value`. Returns `true` only for the call that settled.
    pub fn settle(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            // A dropped settlement still counts as settled: the latch is spent.
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct Settlement<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Settlement<T> {
    /// Wait for the winning value.
    ///
    /// Returns `None` if every completer was dropped without settling.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_settle_wins() {
        let (completer, settlement) = completion::<&'static str>();
        let other = completer.clone();

        assert!(!completer.is_settled());
        assert!(completer.settle("reply"));
        assert!(!other.settle("connection error"));
        assert!(other.is_settled());

        assert_eq!(settlement.wait().await, Some("reply"));
    }

    #[tokio::test]
    async fn dropped_completers_yield_none() {
        let (completer, settlement) = completion::<u8>();
        drop(completer);
        assert_eq!(settlement.wait().await, None);
    }

    #[tokio::test]
    async fn concurrent_settlers_produce_one_winner() {
        let (completer, settlement) = completion::<usize>();
        let mut handles = Vec::new();
        for i in 0..16 {
            let c = completer.clone();
            handles.push(tokio::spawn(async move { c.settle(i) }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(settlement.wait().await.is_some());
    }
}
