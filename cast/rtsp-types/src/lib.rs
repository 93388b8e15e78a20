//! Types of the RTSP-derived cast control protocol: the message grammar,
//! the shared protocol enums and the negotiated parameter model.
//!
//! The grammar intentionally stays close to the wire: one request or
//! response per message, CRLF separated lines (bare LF tolerated), header
//! names lowercased on parse, colon-less lines collected verbatim so that
//! `GET_PARAMETER` bodies can convey keys without values.

mod method;
mod msg;
mod param;
pub mod parse;
mod types;

pub use method::Method;
pub use msg::RtspMessage;
pub use param::{
    AudioProperty, DeviceTypeParamInfo, EncryptionParamInfo, ParamInfo, RemoteControlParamInfo,
    VideoProperty, WindowProperty,
};
pub use types::{
    ActionType, DeviceType, EndType, EventId, LinkType, ModuleType, ProjectionMode, ProtocolType,
    SubDeviceType, VtpType, WaitResponse,
};

/// Sentinel for "not present / failed to parse", matching the wire protocol's
/// use of `-1` across numeric fields.
pub const INVALID_VALUE: i32 = -1;

/// Line separator of the control protocol.
pub const MSG_SEPARATOR: &str = "\r\n";

/// Field separator inside header values (`key value;key value;`).
pub const COMMON_SEPARATOR: &str = ";";

pub const STATUS_OK: i32 = 200;
pub const STATUS_OK_STR: &str = "200 OK";

pub const VIDEO_GOP_IPPP: i32 = -1;
pub const VIDEO_FPS_MIN: i32 = 20;
pub const VIDEO_FPS_MAX: i32 = 60;
pub const VIDEO_GOP_MIN: i32 = 30;
pub const VIDEO_GOP_MAX: i32 = 600;
pub const VIDEO_BITRATE_MIN: i32 = 500_000;
pub const VIDEO_BITRATE_MAX: i32 = 20_000_000;
