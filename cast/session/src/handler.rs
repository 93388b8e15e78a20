use parking_lot::Mutex;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type MessageTask = Arc<dyn Fn() + Send + Sync>;

/// One element of a handler queue.
///
/// Messages are ordered by deadline; two messages with the same `what`
/// replace each other on send.
#[derive(Clone)]
pub struct Message {
    pub what: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub str_arg: String,
    task: Option<MessageTask>,
    when: Instant,
    seq: u64,
}

impl Message {
    pub fn new(what: i32) -> Self {
        Self {
            what,
            arg1: 0,
            arg2: 0,
            str_arg: String::new(),
            task: None,
            when: Instant::now(),
            seq: 0,
        }
    }

    pub fn with_args(what: i32, arg1: i32, arg2: i32) -> Self {
        Self {
            arg1,
            arg2,
            ..Self::new(what)
        }
    }

    pub fn with_str(what: i32, arg1: i32, str_arg: impl Into<String>) -> Self {
        Self {
            arg1,
            str_arg: str_arg.into(),
            ..Self::new(what)
        }
    }

    pub fn delayed(what: i32, uptime_millis: u64) -> Self {
        Self {
            when: Instant::now() + Duration::from_millis(uptime_millis),
            ..Self::new(what)
        }
    }

    /// Attach a closure run instead of the handler callback.
    pub fn with_task(what: i32, task: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            task: Some(Arc::new(task)),
            ..Self::new(what)
        }
    }
}

/// Consumer side of a [`Handler`].
pub trait HandleMessage: Send + Sync {
    fn handle_message(&self, msg: &Message);
}

struct HandlerInner {
    queue: Mutex<Vec<Message>>,
    wakeup: Notify,
    stop: AtomicBool,
    stop_when_empty: AtomicBool,
    next_seq: AtomicU64,
}

/// A deadline-ordered message queue with one worker task.
///
/// The earliest-deadline message runs first; ties are broken by insertion
/// order. Stop is either drain-then-exit or immediate.
pub struct Handler {
    inner: Arc<HandlerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Handler {
    pub fn new(callback: Arc<dyn HandleMessage>) -> Self {
        let inner = Arc::new(HandlerInner {
            queue: Mutex::new(Vec::new()),
            wakeup: Notify::new(),
            stop: AtomicBool::new(false),
            stop_when_empty: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });

        let worker_inner = inner.clone();
        let worker = tokio::spawn(async move {
            Self::run(worker_inner, callback).await;
        });

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn run(inner: Arc<HandlerInner>, callback: Arc<dyn HandleMessage>) {
        loop {
            if inner.stop.load(Ordering::SeqCst) {
                return;
            }

            let deadline = {
                let queue = inner.queue.lock();
                if queue.is_empty() && inner.stop_when_empty.load(Ordering::SeqCst) {
                    return;
                }
                queue.last().map(|msg| msg.when)
            };

            let mut wakeup = pin!(inner.wakeup.notified());
            wakeup.as_mut().enable();

            match deadline {
                None => {
                    wakeup.await;
                    continue;
                }
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, wakeup).await.is_ok() {
                        // queue changed, re-evaluate the earliest deadline
                        continue;
                    }
                }
            }

            let msg = {
                let mut queue = inner.queue.lock();
                match queue.last() {
                    Some(msg) if msg.when <= Instant::now() => queue.pop(),
                    _ => None,
                }
            };

            if let Some(msg) = msg {
                match &msg.task {
                    Some(task) => task(),
                    None if msg.what < 0 => {}
                    None => callback.handle_message(&msg),
                }
            }
        }
    }

    /// Enqueue `msg`, replacing any pending message with the same `what`.
    pub fn send_message(&self, mut msg: Message) -> bool {
        let mut queue = self.inner.queue.lock();
        msg.seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);

        queue.retain(|queued| queued.what != msg.what);
        queue.push(msg);
        // latest deadline first so the worker pops from the back
        queue.sort_by(|a, b| b.when.cmp(&a.when).then(b.seq.cmp(&a.seq)));
        drop(queue);

        self.inner.wakeup.notify_waiters();
        true
    }

    pub fn send(&self, what: i32) -> bool {
        self.send_message(Message::new(what))
    }

    pub fn send_delayed(&self, what: i32, uptime_millis: u64) -> bool {
        self.send_message(Message::delayed(what, uptime_millis))
    }

    pub fn remove_message(&self, what: i32) {
        self.inner.queue.lock().retain(|msg| msg.what != what);
        self.inner.wakeup.notify_waiters();
    }

    pub fn remove_all_messages(&self) {
        self.inner.queue.lock().clear();
        self.inner.wakeup.notify_waiters();
    }

    /// Signal the worker to stop: either after draining the queue, or
    /// immediately.
    pub fn stop_safely(&self, drain_then_exit: bool) {
        if drain_then_exit {
            self.inner.stop_when_empty.store(true, Ordering::SeqCst);
        } else {
            self.inner.stop.store(true, Ordering::SeqCst);
        }
        self.inner.wakeup.notify_waiters();
    }

    pub fn is_quitting(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
            || self.inner.stop_when_empty.load(Ordering::SeqCst)
    }

    /// Wait for the worker to observe the stop signal.
    pub async fn join(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.stop_safely(false);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<i32>>,
    }

    impl HandleMessage for Recorder {
        fn handle_message(&self, msg: &Message) {
            self.seen.lock().push(msg.what);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn messages_run_in_deadline_order() {
        let recorder = Arc::new(Recorder::default());
        let handler = Handler::new(recorder.clone());

        handler.send_message(Message::delayed(3, 300));
        handler.send_message(Message::delayed(1, 100));
        handler.send_message(Message::delayed(2, 200));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*recorder.seen.lock(), vec![1, 2, 3]);

        handler.stop_safely(false);
        handler.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_what_replaces_pending() {
        let recorder = Arc::new(Recorder::default());
        let handler = Handler::new(recorder.clone());

        handler.send_message(Message::delayed(7, 200));
        handler.send_message(Message::delayed(7, 50));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*recorder.seen.lock(), vec![7]);

        handler.stop_safely(false);
        handler.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_messages_never_run() {
        let recorder = Arc::new(Recorder::default());
        let handler = Handler::new(recorder.clone());

        handler.send_message(Message::delayed(5, 100));
        handler.remove_message(5);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(recorder.seen.lock().is_empty());

        handler.stop_safely(false);
        handler.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_run_instead_of_callback() {
        let recorder = Arc::new(Recorder::default());
        let handler = Handler::new(recorder.clone());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        handler.send_message(Message::with_task(9, move || {
            flag.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(recorder.seen.lock().is_empty());

        handler.stop_safely(false);
        handler.join().await;
    }
}
