//! Single-assignment completion signal.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

/// Write side of a one-shot result. The first `complete` wins; later calls
/// are observed no-ops.
#[derive(Debug)]
pub struct Completer<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

/// Read side of a [`Completer`].
pub type Completion<T> = oneshot::Receiver<T>;

impl<T> Completer<T> {
    pub fn new() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Resolve with `value`. Returns `false` if already resolved or if the
    /// reader is gone.
    pub fn complete(&self, value: T) -> bool {
        let taken = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// `true` until the first resolution.
    pub fn is_active(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_write_wins() {
        let (completer, rx) = Completer::new();
        assert!(completer.is_active());
        assert!(completer.complete("success"));
        assert!(!completer.complete("error"));
        assert!(!completer.is_active());
        assert_eq!(rx.await.unwrap(), "success");
    }

    #[tokio::test]
    async fn racing_writers_resolve_once() {
        let (completer, rx) = Completer::new();
        let completer = Arc::new(completer);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = Arc::clone(&completer);
                tokio::spawn(async move { c.complete(i) })
            })
            .collect();

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!((0..8).contains(&rx.await.unwrap()));
    }

    #[tokio::test]
    async fn dropped_completer_closes_reader() {
        let (completer, rx) = Completer::<u8>::new();
        drop(completer);
        assert!(rx.await.is_err());
    }
}
