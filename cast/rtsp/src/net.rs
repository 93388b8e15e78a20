use crate::controller::RtspController;
use crate::{NEG_TIMEOUT_INTERVAL_MS, SESSION_KEY_LENGTH};
use channel::{Channel, ChannelListener};
use parking_lot::Mutex;
use rtsp_types::{LinkType, RtspMessage};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owns the control channel of a session: the encryption state around it,
/// the inbound dispatch worker and the negotiation watchdog.
///
/// Inbound frames are queued and processed strictly in arrival order by a
/// single worker task, which keeps the happens-before of the wait-slot
/// protocol intact.
pub struct RtspChannelManager {
    controller: Weak<RtspController>,
    channel: Mutex<Option<Arc<dyn Channel>>>,

    session_key: Mutex<[u8; SESSION_KEY_LENGTH]>,
    algorithm_id: AtomicI32,
    session_active: AtomicBool,

    data_tx: mpsc::UnboundedSender<Vec<u8>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RtspChannelManager {
    pub(crate) fn new(
        controller: Weak<RtspController>,
        data_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            controller,
            channel: Mutex::new(None),
            session_key: Mutex::new([0u8; SESSION_KEY_LENGTH]),
            algorithm_id: AtomicI32::new(0),
            session_active: AtomicBool::new(false),
            data_tx,
            worker: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    pub(crate) fn spawn_worker(
        self: &Arc<Self>,
        mut data_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(buffer) = data_rx.recv().await {
                this.process_incoming(buffer).await;
            }
        });
        *self.worker.lock() = Some(handle);
    }

    fn is_codec_armed(&self) -> bool {
        self.algorithm_id.load(Ordering::SeqCst) > 0
            && !crypto::is_all_zero(&*self.session_key.lock())
    }

    async fn process_incoming(&self, buffer: Vec<u8>) {
        let plain = if self.is_codec_armed() {
            let key = *self.session_key.lock();
            match crypto::decrypt_data(self.algorithm_id.load(Ordering::SeqCst), &key, &buffer) {
                Ok(plain) => plain,
                Err(e) => {
                    // corrupted control messages are dropped, not fatal
                    log::error!("control message decrypt failed: {e}");
                    return;
                }
            }
        } else {
            buffer
        };

        let Ok(text) = String::from_utf8(plain) else {
            log::error!("control message is not valid utf-8");
            return;
        };
        let Some(controller) = self.controller.upgrade() else {
            log::error!("controller is gone, dropping control message");
            return;
        };

        log::debug!(
            "{} {}",
            if text.starts_with("RTSP/") {
                "response..."
            } else {
                "request..."
            },
            text
        );

        let msg = RtspMessage::parse(&text);
        if msg.is_response() {
            controller.on_response(msg).await;
        } else {
            controller.on_request(msg).await;
        }
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        let mut slot = self.channel.lock();
        if slot.is_some() {
            log::error!("control channel already exists");
        }
        *slot = Some(channel);
    }

    pub fn remove_channel(&self) {
        *self.channel.lock() = None;
    }

    pub fn is_softbus(&self) -> bool {
        self.channel
            .lock()
            .as_ref()
            .map(|c| c.request().link_type == LinkType::SoftBus)
            .unwrap_or(false)
    }

    /// Adopt the session key and mark the session active.
    pub fn start_session(&self, session_key: &[u8]) {
        if session_key.len() != SESSION_KEY_LENGTH {
            log::error!("session key of unexpected length {}", session_key.len());
            return;
        }
        self.session_key.lock().copy_from_slice(session_key);
        self.session_active.store(true, Ordering::SeqCst);
    }

    pub fn stop_session(&self) {
        if self.session_active.swap(false, Ordering::SeqCst) {
            *self.session_key.lock() = [0u8; SESSION_KEY_LENGTH];
        }
        self.cfg_neg_timeout(true);
    }

    /// Arm (or clear) the negotiation watchdog. On expiry the controller's
    /// peer-gone path runs exactly once.
    pub fn cfg_neg_timeout(&self, clear: bool) {
        let mut watchdog = self.watchdog.lock();
        if let Some(handle) = watchdog.take() {
            handle.abort();
        }
        if clear {
            return;
        }

        let controller = self.controller.clone();
        *watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(NEG_TIMEOUT_INTERVAL_MS)).await;
            log::error!("negotiation timed out");
            if let Some(controller) = controller.upgrade() {
                controller.on_peer_gone();
            }
        }));
    }

    /// Arm the negotiated control-channel algorithm.
    pub fn set_neg_algorithm_id(&self, algorithm_id: i32) {
        log::info!("control channel algorithm id {algorithm_id}");
        self.algorithm_id.store(algorithm_id, Ordering::SeqCst);
    }

    /// Send one control message, encrypting when the codec is armed.
    pub async fn send_rtsp_data(&self, data: &str) -> bool {
        if data.is_empty() {
            log::error!("refusing to send empty control message");
            return false;
        }
        if !self.session_active.load(Ordering::SeqCst) {
            log::error!("control session is not active");
            return false;
        }
        let Some(channel) = self.channel.lock().clone() else {
            log::error!("control channel is gone");
            return false;
        };

        let softbus = channel.request().link_type == LinkType::SoftBus;
        if softbus || !self.is_codec_armed() {
            return channel.send(data.as_bytes()).await;
        }

        let key = *self.session_key.lock();
        let sealed = match crypto::encrypt_data(
            self.algorithm_id.load(Ordering::SeqCst),
            &key,
            data.as_bytes(),
        ) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::error!("control message encrypt failed: {e}");
                return false;
            }
        };
        channel.send(&sealed).await
    }
}

impl ChannelListener for RtspChannelManager {
    fn on_data_received(&self, data: &[u8]) {
        if self.data_tx.send(data.to_vec()).is_err() {
            log::error!("control dispatch worker is gone");
        }
    }
}

impl Drop for RtspChannelManager {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.watchdog.lock().take() {
            handle.abort();
        }
        *self.session_key.lock() = [0u8; SESSION_KEY_LENGTH];
    }
}
