//! Manifest file watcher.
//!
//! A polling thread compares (mtime, size) of the manifest each tick and
//! fires the callback once the file has gone quiet -- a burst of writes
//! (e.g. a git checkout touching many files) coalesces into a single
//! re-import attempt.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use tracing::debug;

/// Fingerprint of the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    mtime: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &std::path::Path) -> FileStamp {
    match std::fs::metadata(path) {
        Ok(meta) => FileStamp {
            mtime: meta.modified().ok(),
            len: meta.len(),
        },
        Err(_) => FileStamp {
            mtime: None,
            len: 0,
        },
    }
}

/// Handle to the watcher thread. Dropping it stops the thread.
pub struct ManifestWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ManifestWatcher {
    /// Spawns the watcher.
    ///
    /// `poll` is the sampling period; `quiet` is how long the file must
    /// hold still after a change before `on_change` fires.
    pub fn spawn(
        manifest: PathBuf,
        poll: Duration,
        quiet: Duration,
        on_change: impl Fn() + Send + 'static,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut last_seen = stamp(&manifest);
            let mut pending: Option<FileStamp> = None;

            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(poll);
                let current = stamp(&manifest);

                match pending {
                    None => {
                        if current != last_seen {
                            debug!(path = %manifest.display(), "manifest changed, waiting for quiet period");
                            pending = Some(current);
                        }
                    }
                    Some(awaiting) => {
                        if current != awaiting {
                            // Still churning; restart the quiet window.
                            pending = Some(current);
                        } else {
                            // Quiet for one full window.
                            std::thread::sleep(quiet);
                            let settled = stamp(&manifest);
                            if settled == current {
                                debug!(path = %manifest.display(), "manifest settled, firing");
                                last_seen = settled;
                                pending = None;
                                on_change();
                            } else {
                                pending = Some(settled);
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the watcher and joins the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn detects_a_change_once_settled() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("issues.jsonl");
        std::fs::write(&manifest, b"{}\n").unwrap();

        let fires = Arc::new(AtomicUsize::new(0));
        let counter = fires.clone();
        let watcher = ManifestWatcher::spawn(
            manifest.clone(),
            Duration::from_millis(10),
            Duration::from_millis(20),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(&manifest, b"{}\n{}\n").unwrap();
        std::thread::sleep(Duration::from_millis(300));

        watcher.stop();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_change_no_fire() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("issues.jsonl");
        std::fs::write(&manifest, b"{}\n").unwrap();

        let fires = Arc::new(AtomicUsize::new(0));
        let counter = fires.clone();
        let watcher = ManifestWatcher::spawn(
            manifest,
            Duration::from_millis(10),
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        std::thread::sleep(Duration::from_millis(100));
        watcher.stop();
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
