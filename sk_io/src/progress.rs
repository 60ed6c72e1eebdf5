//! Progress counters and the thread that renders them.
//!
//! Workers only bump atomics; a separate ticker thread samples them at a
//! fixed interval. The ticker never touches codec or filesystem state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicU64,
    current: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub current: u64,
    /// Zero when unknown
    pub total: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.current.fetch_add(n, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.current.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current: self.current.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

pub struct ProgressTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    /// Call `render` every `tick` until stopped, and once more after.
    pub fn spawn<F>(progress: Arc<Progress>, tick: Duration, mut render: F) -> Self
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                render(progress.snapshot());
                thread::park_timeout(tick);
            }
            render(progress.snapshot());
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the ticker and wait for its final render.
    pub fn finish(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.join();
    }
}
