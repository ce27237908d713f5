//! Debounced input
//!
//! One stable debouncer per input. Every [`Debouncer::push`] restarts a
//! single timer; only the last value pushed within the delay reaches the
//! callback.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Debouncer<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, mut callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        let task = tokio::spawn(async move {
            while let Some(mut value) = rx.recv().await {
                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(newer) => value = newer,
                            // Closed with a value pending: drop it
                            None => return,
                        },
                        _ = tokio::time::sleep(delay) => {
                            callback(value);
                            break;
                        }
                    }
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            task,
        }
    }

    pub fn push(&self, value: T) {
        if let Ok(guard) = self.tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(value);
            }
        }
    }

    /// Stop accepting input; a pending value is dropped
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
