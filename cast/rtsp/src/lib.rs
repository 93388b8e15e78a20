//! The RTSP-derived control engine.
//!
//! [`RtspController`] drives the capability handshake (M1..M9), the
//! encryption handshake over `ANNOUNCE`, trigger dispatch and keep-alive,
//! tracking which exchange slot currently expects a reply. The engine
//! receives its byte frames through the channel layer and transparently
//! encrypts/decrypts once a session key and algorithm are armed.

mod controller;
pub mod encap;
mod net;

pub use controller::RtspController;
pub use net::RtspChannelManager;

use rtsp_types::ParamInfo;

pub const ERROR_CODE_DEFAULT: i32 = -1;

/// Length of the session key handed down by the upper layer.
pub const SESSION_KEY_LENGTH: usize = 16;

/// Interval of the negotiation watchdog.
pub const NEG_TIMEOUT_INTERVAL_MS: u64 = 10_000;

/// Upstream listener of the control engine, implemented by the session.
/// Held weakly by the engine; callbacks are dropped once the session is
/// gone.
pub trait RtspListener: Send + Sync {
    fn on_setup(
        &self,
        param: &ParamInfo,
        media_port: i32,
        remote_control_port: i32,
        device_id: &str,
    );
    fn on_play(&self, param: &ParamInfo, port: i32, device_id: &str) -> bool;
    fn on_pause(&self) -> bool;
    fn on_tear_down(&self);
    fn on_error(&self, error_code: i32);
    fn on_peer_gone(&self);

    fn notify_trigger(&self, trigger: i32);
    fn notify_event_change(&self, module_id: i32, event: i32, param: &str);
    fn notify_module_custom_params_negotiation(&self, media_params: &str, controller_params: &str);

    /// Start the VTP media plane; returns the chosen port.
    fn start_media_vtp(&self, _param: &ParamInfo) -> i32 {
        channel::INVALID_PORT
    }

    /// The negotiated projection mode is stream; no media channels follow.
    fn process_stream_mode(&self, param: &ParamInfo, device_id: &str);

    fn on_player_ready(&self, param: &ParamInfo, device_id: &str, ready_flag: i32) -> bool;
}
