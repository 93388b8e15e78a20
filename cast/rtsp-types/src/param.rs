use crate::{DeviceType, ProjectionMode, SubDeviceType, VtpType};
use std::collections::BTreeSet;

/// Video parameters carried by `his_video_formats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoProperty {
    pub codec_type: i32,
    pub fps: i32,
    pub gop: i32,
    pub bitrate: i32,
    pub min_bitrate: i32,
    pub max_bitrate: i32,
    pub dpi: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub color_standard: i32,
}

/// Audio parameters carried by `his_audio_codecs` / `his_audio_formats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioProperty {
    pub codec: u32,
    pub sample_rate: u32,
    pub sample_bit_width: u8,
    pub channel_config: u32,
    pub bitrate: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowProperty {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceTypeParamInfo {
    pub local_device_type: DeviceType,
    pub local_device_subtype: SubDeviceType,
    pub remote_device_type: DeviceType,
    pub remote_device_subtype: SubDeviceType,
}

/// UIBC (reverse input) capability lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteControlParamInfo {
    pub support_uibc: bool,
    pub support_generic: bool,
    pub support_hidc: bool,
    pub support_vendor: bool,
    pub generic_list: Vec<String>,
    pub hidc_list: Vec<String>,
    pub vendor_list: Vec<String>,
}

/// Encryption algorithm ids negotiated for the control and data channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionParamInfo {
    pub control_channel_alg: i32,
    pub data_channel_alg: i32,
}

/// The full parameter set of one endpoint.
///
/// Two copies live in the control engine: the local set (what we support)
/// and the negotiated set (the intersection after the handshake). The
/// negotiated copy starts as a clone of the local one and is narrowed while
/// M3/M4 are processed.
#[derive(Debug, Clone, Default)]
pub struct ParamInfo {
    pub version: f64,
    pub video: VideoProperty,
    pub audio: AudioProperty,
    pub window: WindowProperty,
    pub device_type: DeviceTypeParamInfo,
    pub remote_control: RemoteControlParamInfo,
    pub feature_set: BTreeSet<i32>,
    pub vtp: VtpType,
    pub projection_mode: ProjectionMode,
    pub encryption: EncryptionParamInfo,
    /// Opaque media capability blob exchanged for the stream player.
    pub media_capability: String,
    /// Opaque player-controller capability blob.
    pub player_controller_capability: String,
}
