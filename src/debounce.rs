use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Collapses bursts of writes into one. Each `schedule` replaces the pending
/// value and restarts the quiet interval; the sink sees only the last value.
pub struct DebouncedSaver<T> {
    delay: Duration,
    sink: Sink<T>,
    pending: Arc<Mutex<Option<T>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> DebouncedSaver<T> {
    pub fn new<F>(delay: Duration, sink: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            sink: Arc::new(sink),
            pending: Arc::new(Mutex::new(None)),
            timer: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, value: T) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(value);
        }

        let delay = self.delay;
        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let value = pending.lock().ok().and_then(|mut p| p.take());
            if let Some(value) = value {
                sink(value);
            }
        });

        if let Ok(mut timer) = self.timer.lock() {
            if let Some(previous) = timer.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Write the pending value now, if any.
    pub fn flush(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
        let value = self.pending.lock().ok().and_then(|mut p| p.take());
        if let Some(value) = value {
            (self.sink)(value);
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}
