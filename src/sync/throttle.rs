//! Throttled query
//!
//! Repeating the same query inside the window returns the previous result
//! instead of hitting the backend again. Concurrent callers wait for the
//! in-flight query and share its result.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default window between identical queries
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(2);

pub struct Throttled<T> {
    window: Duration,
    last: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> Throttled<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Run `query` unless a result younger than the window exists
    pub async fn get<F, Fut>(&self, query: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last = self.last.lock().await;
        if let Some((started, value)) = last.as_ref() {
            if started.elapsed() < self.window {
                return value.clone();
            }
        }

        let started = Instant::now();
        let value = query().await;
        *last = Some((started, value.clone()));
        value
    }

    /// Like [`Throttled::get`], but only successful results are kept
    pub async fn try_get<F, Fut, E>(&self, query: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last = self.last.lock().await;
        if let Some((started, value)) = last.as_ref() {
            if started.elapsed() < self.window {
                return Ok(value.clone());
            }
        }

        let started = Instant::now();
        let value = query().await?;
        *last = Some((started, value.clone()));
        Ok(value)
    }

    /// Forget the cached result
    pub async fn reset(&self) {
        *self.last.lock().await = None;
    }
}

impl<T: Clone> Default for Throttled<T> {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}
