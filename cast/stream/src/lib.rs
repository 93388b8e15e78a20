//! Stream-mode bridge: the JSON action protocol that proxies player
//! commands and callbacks between source and sink, plus the chunked
//! HTTP-like channel that lets the sink read the source's local media.
//!
//! The source runs a [`StreamBridgeClient`] (commands out, callbacks in)
//! next to a [`local::LocalFileChannelServer`]; the sink runs a
//! [`StreamBridgeServer`] driving the opaque player, next to a
//! [`local::LocalFileChannelClient`] feeding a [`local::LocalDataSource`].

mod client;
pub mod local;
mod media;
mod player;
mod queue;
mod server;

pub use client::StreamBridgeClient;
pub use media::{MediaInfo, MediaInfoHolder};
pub use player::RemotePlayerController;
pub use server::StreamBridgeServer;

use rtsp_types::EventId;

/// Module event ids carried over the stream channel.
pub const MODULE_EVENT_ID_CONTROL_EVENT: i32 = 100;
pub const MODULE_EVENT_ID_CALLBACK_EVENT: i32 = 101;
pub const MODULE_EVENT_ID_CHANNEL_CREATE: i32 = 102;
pub const MODULE_EVENT_ID_CHANNEL_DESTROY: i32 = 103;
pub const MODULE_EVENT_ID_STREAM_CHANNEL: i32 = 104;

pub const CAST_STREAM_FULL_VOLUME: i32 = 100;
pub const CAST_STREAM_INT_INVALID: i32 = -1;
pub const CAST_STREAM_INT_IGNORE: i32 = -1;

pub(crate) const AUTO_POSITION_UPDATE_INTERVAL_MS: u64 = 100;
pub(crate) const AUTO_POSITION_SYNC_INTERVAL_MS: u64 = 10_000;
pub(crate) const POSITION_LAG_MINIMUM: i32 = 50;
pub(crate) const POSITION_LAG_MAXIMUM: i32 = 150;

pub const ERR_CODE_PLAY_FAILED: i32 = 10003;

/// Playback state mirrored between the endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayerState {
    #[default]
    Idle = 0,
    Prepared = 1,
    Started = 2,
    Paused = 3,
    Stopped = 4,
    PlaybackComplete = 5,
    Error = 6,
}

impl PlayerState {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => PlayerState::Prepared,
            2 => PlayerState::Started,
            3 => PlayerState::Paused,
            4 => PlayerState::Stopped,
            5 => PlayerState::PlaybackComplete,
            6 => PlayerState::Error,
            _ => PlayerState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    Sequence = 0,
    Single = 1,
    List = 2,
    Shuffle = 3,
}

impl LoopMode {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => LoopMode::Single,
            2 => LoopMode::List,
            3 => LoopMode::Shuffle,
            _ => LoopMode::Sequence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackSpeed {
    SpeedForward075 = 0,
    #[default]
    SpeedForward100 = 1,
    SpeedForward125 = 2,
    SpeedForward175 = 3,
    SpeedForward200 = 4,
}

impl PlaybackSpeed {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => PlaybackSpeed::SpeedForward075,
            2 => PlaybackSpeed::SpeedForward125,
            3 => PlaybackSpeed::SpeedForward175,
            4 => PlaybackSpeed::SpeedForward200,
            _ => PlaybackSpeed::SpeedForward100,
        }
    }
}

/// Outbound surface of the bridge, implemented by the session: hands
/// serialized actions to the peer over the stream channel and surfaces
/// bridge events upward.
pub trait StreamListener: Send + Sync {
    fn send_action_to_peers(&self, event_id: i32, param: &str) -> bool;
    fn on_render_ready(&self, is_ready: bool);
    fn on_event(&self, event: EventId, data: &str);
}

/// The opaque media player on the sink, driven by the bridge server.
pub trait StreamPlayer: Send + Sync {
    fn load(&self, media: &MediaInfo) -> bool;
    fn inner_play(&self, media: &MediaInfo) -> bool;
    fn play(&self) -> bool;
    fn pause(&self) -> bool;
    fn stop(&self) -> bool;
    fn next(&self) -> bool;
    fn previous(&self) -> bool;
    fn seek(&self, position: i32) -> bool;
    fn fast_forward(&self, delta: i32) -> bool;
    fn fast_rewind(&self, delta: i32) -> bool;
    fn set_volume(&self, volume: i32) -> bool;
    fn set_mute(&self, mute: bool) -> bool;
    fn set_loop_mode(&self, mode: LoopMode) -> bool;
    fn set_speed(&self, speed: PlaybackSpeed) -> bool;
}

/// Player observer surface on the source: every callback the sink emits is
/// reflected here.
pub trait StreamPlayerListener: Send + Sync {
    fn on_state_changed(&self, state: PlayerState, is_play_when_ready: bool);
    fn on_position_changed(&self, position: i32, buffer_position: i32, duration: i32);
    fn on_media_item_changed(&self, media: &MediaInfo);
    fn on_volume_changed(&self, volume: i32, max_volume: i32);
    fn on_loop_mode_changed(&self, mode: LoopMode);
    fn on_play_speed_changed(&self, speed: PlaybackSpeed);
    fn on_player_error(&self, error_code: i32, error_msg: &str);
    fn on_next_request(&self);
    fn on_previous_request(&self);
    fn on_seek_done(&self, position: i32);
    fn on_end_of_stream(&self, is_looping: i32);
    fn on_play_request(&self, media: &MediaInfo);
}

pub(crate) mod keys {
    pub const KEY_ACTION: &str = "ACTION";
    pub const KEY_CALLBACK_ACTION: &str = "CALLBACK_ACTION";
    pub const KEY_DATA: &str = "DATA";
    pub const KEY_CURRENT_INDEX: &str = "CURRENT_INDEX";
    pub const KEY_PROGRESS_INTERVAL: &str = "PROGRESS_INTERVAL";
    pub const KEY_LIST: &str = "LIST";
    pub const KEY_VOLUME: &str = "VOLUME";
    pub const KEY_MUTE: &str = "MUTE";
    pub const KEY_MAX_VOLUME: &str = "MAX_VOLUME";
    pub const KEY_MODE: &str = "MODE";
    pub const KEY_REPEAT_MODE: &str = "REPEAT_MODE";
    pub const KEY_DELTA: &str = "DELTA";
    pub const KEY_SPEED: &str = "SPEED";
    pub const KEY_POSITION: &str = "POSITION";
    pub const KEY_BUFFER_POSITION: &str = "BUFFER_POSITION";
    pub const KEY_DURATION: &str = "DURATION";
    pub const KEY_ERROR_CODE: &str = "ERROR_CODE";
    pub const KEY_ERROR_MSG: &str = "ERROR_MSG";
    pub const KEY_PLAYBACK_STATE: &str = "PLAYBACK_STATE";
    pub const KEY_IS_PLAY_WHEN_READY: &str = "IS_PLAY_WHEN_READY";
    pub const KEY_IS_LOOPING: &str = "IS_LOOPING";
    pub const KEY_PARAMS_STREAM_VOLUME: &str = "MEDIA_VOLUME";
    pub const KEY_PARAMS_PLAYER_VERSION_CODE: &str = "PLAYER_VERSION_CODE";
    pub const KEY_CAPABILITY_SUPPORT_4K: &str = "SUPPORT_4K";
    pub const KEY_CAPABILITY_SUPPORT_DRM: &str = "DRM_CAPABILITY";
    pub const KEY_CAPABILITY_DRM_PROPERTIES: &str = "DRM_PROPERTIES_CAPABILITY";
}

pub(crate) mod actions {
    pub const PLAY: &str = "play";
    pub const LOAD: &str = "load";
    pub const PAUSE: &str = "pause";
    pub const RESUME: &str = "resume";
    pub const STOP: &str = "stop";
    pub const NEXT: &str = "next";
    pub const PREVIOUS: &str = "previous";
    pub const SEEK: &str = "seek";
    pub const FAST_FORWARD: &str = "fastForward";
    pub const FAST_REWIND: &str = "fastRewind";
    pub const SET_VOLUME: &str = "setVolume";
    pub const SET_MUTE: &str = "setMute";
    pub const SET_REPEAT_MODE: &str = "setRepeatMode";
    pub const SET_SPEED: &str = "setSpeed";
    pub const PLAYER_STATUS_CHANGED: &str = "onPlayerStatusChanged";
    pub const POSITION_CHANGED: &str = "onPositionChanged";
    pub const MEDIA_ITEM_CHANGED: &str = "onMediaItemChanged";
    pub const VOLUME_CHANGED: &str = "onVolumeChanged";
    pub const REPEAT_MODE_CHANGED: &str = "onRepeatModeChanged";
    pub const SPEED_CHANGED: &str = "onPlaySpeedChanged";
    pub const PLAYER_ERROR: &str = "onPlayerError";
    pub const NEXT_REQUEST: &str = "onNextRequest";
    pub const PREVIOUS_REQUEST: &str = "onPreviousRequest";
    pub const SEEK_DONE: &str = "onSeekDone";
    pub const END_OF_STREAM: &str = "onEndOfStream";
    pub const PLAY_REQUEST: &str = "onPlayRequest";
}

pub(crate) mod json {
    use serde_json::Value;

    pub fn get_i32(data: &Value, key: &str) -> Option<i32> {
        data.get(key)?.as_i64()?.try_into().ok()
    }

    pub fn get_i64(data: &Value, key: &str) -> Option<i64> {
        data.get(key)?.as_i64()
    }

    pub fn get_bool(data: &Value, key: &str) -> Option<bool> {
        data.get(key)?.as_bool()
    }

    pub fn get_str(data: &Value, key: &str) -> Option<String> {
        Some(data.get(key)?.as_str()?.to_string())
    }
}

/// Capability blob exchanged through the control channel negotiation.
pub fn stream_player_capability(volume: i32, max_volume: i32) -> String {
    serde_json::json!({
        keys::KEY_PARAMS_STREAM_VOLUME: volume,
        keys::KEY_MAX_VOLUME: max_volume,
        keys::KEY_PARAMS_PLAYER_VERSION_CODE: CAST_STREAM_INT_INVALID,
        keys::KEY_CAPABILITY_SUPPORT_4K: CAST_STREAM_INT_INVALID,
        keys::KEY_CAPABILITY_SUPPORT_DRM: CAST_STREAM_INT_INVALID,
        keys::KEY_CAPABILITY_DRM_PROPERTIES: CAST_STREAM_INT_INVALID,
    })
    .to_string()
}
