use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::error::{LinkError, Result};

/// A named background thread that can be joined with a deadline.
pub(crate) struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    exited: mpsc::Receiver<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, exited) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Dropped on return or unwind; the receiver sees a disconnect.
                let _exit_signal = tx;
                body();
            })
            .map_err(|source| LinkError::ThreadSpawn { name, source })?;
        Ok(Self {
            name,
            handle,
            exited,
        })
    }

    /// Join if the thread exits within `timeout`; otherwise detach it.
    ///
    /// Returns `true` when the thread was joined.
    pub(crate) fn join_timeout(self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!(thread = self.name, "background thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    thread = self.name,
                    ?timeout,
                    "background thread did not exit in time; detaching"
                );
                false
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sleep up to `total`, waking early once `stop` returns true.
pub(crate) fn sleep_unless(total: Duration, step: Duration, stop: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + total;
    loop {
        if stop() {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn joins_a_quick_thread() {
        let worker = Worker::spawn("quick", || {}).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn detaches_a_stuck_thread() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let worker = Worker::spawn("stuck", move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        let start = Instant::now();
        assert!(!worker.join_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() < Duration::from_millis(500));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn sleep_unless_wakes_early() {
        let start = Instant::now();
        let completed = sleep_unless(Duration::from_secs(5), Duration::from_millis(5), || {
            start.elapsed() > Duration::from_millis(20)
        });
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
