use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// FIFO queue of pending actions with one worker task.
///
/// Actions of the same name keep their arrival order. Shutdown drops the
/// queued remainder without running it.
pub(crate) struct ActionQueue {
    tx: mpsc::UnboundedSender<(String, Value)>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActionQueue {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
        let running = Arc::new(AtomicBool::new(true));

        let worker_running = running.clone();
        let worker = tokio::spawn(async move {
            while let Some((action, data)) = rx.recv().await {
                if !worker_running.load(Ordering::SeqCst) {
                    break;
                }
                handler(&action, &data);
            }
        });

        Self {
            tx,
            running,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) fn enqueue(&self, action: String, data: Value) {
        log::info!("enqueue action {action}");
        if self.tx.send((action, data)).is_err() {
            log::error!("action worker is gone");
        }
    }

    pub(crate) fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
