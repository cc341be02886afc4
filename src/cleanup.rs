//! Delayed deletion of temporary files on a background thread.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Pending {
    deadline: Instant,
    path: PathBuf,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<Pending>,
    shutdown: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    cvar: Condvar,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deletes files after a delay without blocking the caller.
///
/// Dropping the handle deletes everything still pending right away.
pub struct DeferredCleanup {
    queue: Arc<Queue>,
    worker: Option<JoinHandle<()>>,
}

impl DeferredCleanup {
    pub fn new() -> io::Result<Self> {
        let queue = Arc::new(Queue::default());
        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name("img-depot-cleanup".to_string())
            .spawn(move || run(&worker_queue))?;
        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    pub fn schedule(&self, path: impl Into<PathBuf>, delay: Duration) {
        let path = path.into();
        debug!(path = %path.display(), delay_ms = delay.as_millis() as u64, "Scheduled deletion");
        self.queue.lock().pending.push(Pending {
            deadline: Instant::now() + delay,
            path,
        });
        self.queue.cvar.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }
}

impl Drop for DeferredCleanup {
    fn drop(&mut self) {
        self.queue.lock().shutdown = true;
        self.queue.cvar.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Cleanup thread panicked");
            }
        }
    }
}

fn run(queue: &Queue) {
    let mut state = queue.lock();
    loop {
        let now = Instant::now();
        let due: Vec<PathBuf> = if state.shutdown {
            state.pending.drain(..).map(|p| p.path).collect()
        } else {
            let (due, waiting): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|p| p.deadline <= now);
            state.pending = waiting;
            due.into_iter().map(|p| p.path).collect()
        };

        if !due.is_empty() {
            drop(state);
            for path in &due {
                delete(path);
            }
            state = queue.lock();
            continue;
        }
        if state.shutdown {
            return;
        }

        let next_deadline = state.pending.iter().map(|p| p.deadline).min();
        state = match next_deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(now);
                queue
                    .cvar
                    .wait_timeout(state, timeout)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0)
            }
            None => queue
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

fn delete(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Deleted temporary file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete temporary file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_deletes_after_delay() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bundle.tar.gz");
        fs::write(&path, b"data").unwrap();

        let cleanup = DeferredCleanup::new().unwrap();
        cleanup.schedule(&path, Duration::from_millis(50));
        assert!(path.exists());

        let deadline = Instant::now() + Duration::from_secs(5);
        while path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!path.exists());
        assert_eq!(cleanup.pending(), 0);
    }

    #[test]
    fn test_drop_flushes_pending() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.tar.gz");
        fs::write(&path, b"data").unwrap();

        let cleanup = DeferredCleanup::new().unwrap();
        cleanup.schedule(&path, Duration::from_secs(3600));
        assert_eq!(cleanup.pending(), 1);
        drop(cleanup);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let cleanup = DeferredCleanup::new().unwrap();
        cleanup.schedule(temp_dir.path().join("gone"), Duration::ZERO);
        drop(cleanup);
    }
}
