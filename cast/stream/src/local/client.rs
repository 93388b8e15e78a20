use super::{parse_http_response, DataListener};
use crate::server::StreamBridgeServer;
use channel::{Channel, ChannelListener};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// How long a caller may wait for the file channel to come up.
const CREATE_CHANNEL_TIMEOUT_MS: u64 = 100;

/// Sink side of the local-file channel: issues ranged `GET` requests and
/// routes the responses to the data listener owning the file id.
pub struct LocalFileChannelClient {
    bridge: Weak<StreamBridgeServer>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    channel_ready: Notify,
    data_listeners: Mutex<Vec<Arc<dyn DataListener>>>,
}

impl LocalFileChannelClient {
    pub(crate) fn new(bridge: Weak<StreamBridgeServer>) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            channel: Mutex::new(None),
            channel_ready: Notify::new(),
            data_listeners: Mutex::new(Vec::new()),
        })
    }

    /// Ask the peer (through the stream bridge) to create the file channel.
    pub fn notify_create_channel(&self) {
        if self.channel.lock().is_some() {
            log::debug!("file channel already exists");
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            log::error!("stream bridge is gone");
            return;
        };
        bridge.notify_peer_create_channel();
    }

    /// Block the caller briefly until [`Self::add_channel`] ran.
    pub async fn wait_create_channel(&self) {
        if self.channel.lock().is_some() {
            return;
        }
        let notified = self.channel_ready.notified();
        if tokio::time::timeout(Duration::from_millis(CREATE_CHANNEL_TIMEOUT_MS), notified)
            .await
            .is_err()
            && self.channel.lock().is_none()
        {
            log::error!("file channel create timeout");
        }
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.lock() = Some(channel);
        self.channel_ready.notify_waiters();
    }

    pub fn remove_channel(&self) {
        *self.channel.lock() = None;
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) {
        let mut listeners = self.data_listeners.lock();
        listeners.push(listener);
        log::debug!("{} data listeners", listeners.len());
    }

    pub fn remove_data_listener(&self, listener: &Arc<dyn DataListener>) {
        let mut listeners = self.data_listeners.lock();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        log::debug!("{} data listeners", listeners.len());
    }

    /// Request `[start, end)` of `file_id` from the peer.
    pub async fn request_byte_data(&self, start: i64, end: i64, file_id: &str) {
        let channel = self.channel.lock().clone();
        let Some(channel) = channel else {
            log::error!("file channel is not created");
            return;
        };

        let request = format!("GET {file_id} HTTP/1.1\r\nRange: bytes={start}-{end}\r\n\r\n");
        log::debug!("requesting {file_id} range {start}-{end}");
        channel.send(request.as_bytes()).await;
    }

    /// The file length travels inside the media info; the probe request is
    /// kept server-side for compatible peers.
    pub fn request_file_length(&self, _file_id: &str) -> i64 {
        0
    }
}

impl ChannelListener for LocalFileChannelClient {
    fn on_data_received(&self, data: &[u8]) {
        let Some(response) = parse_http_response(data) else {
            log::error!("file response header parse error");
            return;
        };
        if response.status_code != "200" {
            log::error!("file response status {}", response.status_code);
            return;
        }

        let payload_len = data.len().saturating_sub(response.data_offset);
        if response.content_length <= 0
            || response.content_length > payload_len as i64
            || response.range_start < 0
        {
            log::error!(
                "invalid file response, length {} start {}",
                response.content_length,
                response.range_start
            );
            return;
        }

        let payload = &data
            [response.data_offset..response.data_offset + response.content_length as usize];

        let listeners = self.data_listeners.lock().clone();
        for listener in listeners {
            if listener.on_bytes_received(&response.file_id, payload, response.range_start) {
                log::debug!("file data delivered");
                break;
            }
        }
    }
}
