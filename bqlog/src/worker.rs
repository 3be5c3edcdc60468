//! The consumer-thread scheduling model: one dedicated worker per
//! *independent*-mode log, one shared worker servicing all *async*-mode
//! logs, and synchronous-mode logs bypassing a worker entirely.
//!
//! A worker polls its assigned logs' ring buffers on a bounded 66 ms
//! timeout rather than blocking indefinitely, so a force-flush request
//! never waits longer than one tick to be noticed.

use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    thread::JoinHandle,
    time::Duration,
};

use crate::manager::Log;

const POLL_TIMEOUT: Duration = Duration::from_millis(66);
const IO_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

enum Control {
    /// Flushes every assigned log (`None`) or just the one matching
    /// `log_index` (`Some`), acking on the paired sender once done.
    ForceFlush { log_index: Option<u32>, ack: mpsc::Sender<()> },
    /// Wakes the worker early (a producer hit low space or a failed
    /// allocation) without forcing a disk flush.
    Nudge,
    Shutdown,
}

/// A handle to a running worker thread. Dropping it does not stop the
/// thread; call [`Worker::shutdown`] explicitly.
pub(crate) struct Worker {
    logs: Arc<Mutex<Vec<Arc<Log>>>>,
    control: mpsc::Sender<Control>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker dedicated to a single independent-mode log.
    pub(crate) fn spawn_independent(log: Arc<Log>) -> Self {
        Self::spawn(Arc::new(Mutex::new(vec![log])))
    }

    /// Spawns the shared worker that services every async-mode log.
    /// Additional logs are attached later via [`Worker::register`].
    pub(crate) fn spawn_shared() -> Self {
        Self::spawn(Arc::new(Mutex::new(Vec::new())))
    }

    fn spawn(logs: Arc<Mutex<Vec<Arc<Log>>>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let worker_logs = Arc::clone(&logs);

        let thread_handle = thread::spawn(move || run(worker_logs, receiver));

        Self { logs, control: sender, thread_handle: Some(thread_handle) }
    }

    /// Attaches another log to a shared worker's rotation.
    pub(crate) fn register(&self, log: Arc<Log>) {
        self.logs.lock().unwrap().push(log);
    }

    /// Flushes every log this worker services: drains buffers, flushes
    /// file caches, then flushes the OS cache to durable storage. Blocks
    /// until the worker thread has acted on the request.
    pub(crate) fn force_flush_all(&self) {
        self.force_flush(None);
    }

    /// Flushes only the log at `log_index` within this worker's set.
    pub(crate) fn force_flush(&self, log_index: Option<u32>) {
        let (ack, ack_rx) = mpsc::channel();
        if self.control.send(Control::ForceFlush { log_index, ack }).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Wakes the worker ahead of its next poll tick, e.g. because a
    /// producer observed low space in its ring buffer.
    pub(crate) fn nudge(&self) {
        let _ = self.control.send(Control::Nudge);
    }

    /// Signals the worker to stop and joins its thread.
    pub(crate) fn shutdown(mut self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(logs: Arc<Mutex<Vec<Arc<Log>>>>, control: mpsc::Receiver<Control>) {
    let mut last_flush = std::time::Instant::now();

    loop {
        match control.recv_timeout(POLL_TIMEOUT) {
            Ok(Control::ForceFlush { log_index, ack }) => {
                drain_and_flush(&logs, log_index, true);
                let _ = ack.send(());
            }
            Ok(Control::Shutdown) => {
                drain_and_flush(&logs, None, true);
                return;
            }
            Ok(Control::Nudge) => {
                drain_and_flush(&logs, None, false);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let should_flush_to_disk = last_flush.elapsed() >= IO_FLUSH_INTERVAL;
                drain_and_flush(&logs, None, should_flush_to_disk);
                if should_flush_to_disk {
                    last_flush = std::time::Instant::now();
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn drain_and_flush(logs: &Arc<Mutex<Vec<Arc<Log>>>>, log_index: Option<u32>, flush_to_disk: bool) {
    let snapshot: Vec<Arc<Log>> = logs.lock().unwrap().clone();
    for log in &snapshot {
        if let Some(index) = log_index {
            if log.index() != index {
                continue;
            }
        }
        log.drain_transport();
        log.flush_caches(flush_to_disk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppenderConfig, LogConfig},
        manager::Log,
    };

    fn test_log(index: u32) -> Arc<Log> {
        Arc::new(Log::new_for_test(
            index,
            "test".to_owned(),
            LogConfig::default(),
            vec!["default".to_owned()],
            Vec::<AppenderConfig>::new(),
        ))
    }

    #[test]
    fn test_shared_worker_registers_and_shuts_down() {
        let worker = Worker::spawn_shared();
        worker.register(test_log(0));
        worker.register(test_log(1));
        worker.force_flush_all();
        worker.shutdown();
    }

    #[test]
    fn test_independent_worker_force_flush_single_log() {
        let worker = Worker::spawn_independent(test_log(0));
        worker.force_flush(Some(0));
        worker.shutdown();
    }
}
