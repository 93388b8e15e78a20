use crate::{ChannelRequest, Result};
use rtsp_types::ModuleType;
use std::sync::Arc;

/// Send surface of a live channel. The channel manager and the protocol
/// engines speak only to this.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn request(&self) -> &ChannelRequest;

    /// Send one application payload. The transport frames it as needed.
    async fn send(&self, data: &[u8]) -> bool;
}

/// A connection owns the transport state behind a channel.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Start as the listening side. Returns the locally bound port
    /// (the request's local port, or the ephemeral one picked by the OS).
    async fn start_listen(self: Arc<Self>) -> Result<i32>;

    /// Start as the connecting side.
    async fn start_connection(self: Arc<Self>) -> Result<i32>;

    /// Idempotent shutdown; the connection listener is notified exactly once.
    async fn close(self: Arc<Self>);

    fn channel(self: Arc<Self>) -> Arc<dyn Channel>;

    fn request(&self) -> &ChannelRequest;
}

/// Per-channel data consumer, supplied by whoever created the channel.
pub trait ChannelListener: Send + Sync {
    fn on_data_received(&self, data: &[u8]);
}

/// Transport-level events a connection reports to the channel manager.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_opened(&self, channel: Arc<dyn Channel>);
    fn on_connection_connect_failed(&self, request: &ChannelRequest, error_code: i32);
    fn on_connection_error(&self, channel: Arc<dyn Channel>, error_code: i32);
    fn on_connection_closed(&self, channel: Arc<dyn Channel>);
}

/// Upstream listener of the channel manager, implemented by the session.
pub trait ChannelManagerListener: Send + Sync {
    fn on_channel_created(&self, channel: Arc<dyn Channel>);
    fn on_channel_open_failed(&self, request: &ChannelRequest, error_code: i32);
    fn on_channel_error(&self, channel: Arc<dyn Channel>, error_code: i32);
    fn on_channel_removed(&self, channel: Arc<dyn Channel>);

    /// Record that a media channel of `module` has opened.
    fn set_media_channel(&self, module: ModuleType);

    /// Whether the media channels required by the session protocol are up.
    fn is_media_channel_ready(&self) -> bool;
}
