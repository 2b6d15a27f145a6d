//! Dirty tracking with a debounced flush.
//!
//! Every write marks the workspace dirty; a background thread coalesces
//! rapid marks and fires the flush callback once the configured quiet
//! period elapses with no further writes.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

enum Msg {
    Mark,
    Shutdown,
}

/// Debounced dirty-bit tracker.
///
/// Dropping the tracker shuts the background thread down; a pending flush
/// fires first so no writes are lost.
pub struct DirtyTracker {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<()>>,
}

impl DirtyTracker {
    /// Spawns the tracker. `flush` runs on the background thread after the
    /// debounce window closes.
    pub fn spawn(debounce: Duration, flush: impl Fn() + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<Msg>();

        let handle = std::thread::spawn(move || {
            loop {
                // Idle: wait for the first mark.
                match rx.recv() {
                    Ok(Msg::Mark) => {}
                    Ok(Msg::Shutdown) | Err(_) => return,
                }

                // Dirty: coalesce further marks until a quiet window passes.
                loop {
                    match rx.recv_timeout(debounce) {
                        Ok(Msg::Mark) => continue,
                        Ok(Msg::Shutdown) => {
                            debug!("flushing on shutdown");
                            flush();
                            return;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("debounce window closed, flushing");
                            flush();
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            flush();
                            return;
                        }
                    }
                }
            }
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Marks the workspace dirty, scheduling a flush after the debounce.
    pub fn mark_dirty(&self) {
        let _ = self.tx.send(Msg::Mark);
    }
}

impl Drop for DirtyTracker {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn rapid_marks_coalesce_into_one_flush() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = flushes.clone();
        let tracker = DirtyTracker::spawn(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..10 {
            tracker.mark_dirty();
            std::thread::sleep(Duration::from_millis(5));
        }

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_marks_no_flush() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = flushes.clone();
        {
            let _tracker = DirtyTracker::spawn(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pending_mark_flushes_on_drop() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = flushes.clone();
        {
            let tracker = DirtyTracker::spawn(Duration::from_secs(60), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tracker.mark_dirty();
            // Dropped long before the debounce would fire.
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn separated_marks_flush_separately() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = flushes.clone();
        let tracker = DirtyTracker::spawn(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.mark_dirty();
        std::thread::sleep(Duration::from_millis(80));
        tracker.mark_dirty();
        std::thread::sleep(Duration::from_millis(80));

        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }
}
