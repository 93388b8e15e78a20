use std::fmt;

/// Role of the local endpoint inside a cast session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndType {
    Source,
    Sink,
}

/// Variant of the cast protocol a session was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    Mirror,
    Stream,
    Cooperation,
    HiCar,
    SuperLauncher,
}

/// Logical module a channel belongs to. Identifies the routing target of a
/// connection and selects the bus payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Auth,
    Rtsp,
    Rtcp,
    Video,
    Audio,
    RemoteControl,
    Stream,
    UiFiles,
    UiBytes,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleType::Auth => "AUTH",
            ModuleType::Rtsp => "RTSP",
            ModuleType::Rtcp => "RTCP",
            ModuleType::Video => "VIDEO",
            ModuleType::Audio => "AUDIO",
            ModuleType::RemoteControl => "REMOTE_CONTROL",
            ModuleType::Stream => "STREAM",
            ModuleType::UiFiles => "UI_FILES",
            ModuleType::UiBytes => "UI_BYTES",
        };
        f.write_str(s)
    }
}

/// Link kind a channel runs over.
///
/// `Vtp` is a reliable-UDP transport in the protocol, carried as an alias of
/// TCP here; role selection still follows the VTP row of the role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Tcp,
    Vtp,
    SoftBus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceType {
    #[default]
    Default = 0,
    CastPlus = 1,
    HiCar = 2,
    Pad = 3,
    Tv = 4,
}

impl DeviceType {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => DeviceType::CastPlus,
            2 => DeviceType::HiCar,
            3 => DeviceType::Pad,
            4 => DeviceType::Tv,
            _ => DeviceType::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SubDeviceType {
    #[default]
    Default = 0,
    Matebook = 1,
    SmartScreen = 2,
}

impl SubDeviceType {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => SubDeviceType::Matebook,
            2 => SubDeviceType::SmartScreen,
            _ => SubDeviceType::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectionMode {
    #[default]
    Mirror,
    Stream,
}

/// Negotiated VTP capability. The engine carries the knob forward without
/// using it; see the negotiation code for the coercion it applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VtpType {
    #[default]
    NotSupportVideo,
    SupportVideo,
    SupportAv,
}

/// Trigger methods carried by `SET_PARAMETER` via `his_trigger_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Setup,
    Play,
    Pause,
    Teardown,
    VideoStart,
    VideoStop,
    SendEventChange,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Setup => "SETUP",
            ActionType::Play => "PLAY",
            ActionType::Pause => "PAUSE",
            ActionType::Teardown => "TEARDOWN",
            ActionType::VideoStart => "VIDEO_START",
            ActionType::VideoStop => "VIDEO_STOP",
            ActionType::SendEventChange => "SEND_EVENT_CHANGE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "SETUP" => ActionType::Setup,
            "PLAY" => ActionType::Play,
            "PAUSE" => ActionType::Pause,
            "TEARDOWN" => ActionType::Teardown,
            "VIDEO_START" => ActionType::VideoStart,
            "VIDEO_STOP" => ActionType::VideoStop,
            "SEND_EVENT_CHANGE" => ActionType::SendEventChange,
            _ => return None,
        })
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The exchange slot the engine currently expects a response for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitResponse {
    #[default]
    None,
    OptM1,
    OptM2,
    GetParamM3,
    SetParamM4,
    SetParamM5,
    SetupM6,
    PlayM7,
    TeardownM8,
    PauseM9,
    KeepAlive,
    Announce,
}

/// User-observable session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    RenderReady,
    StreamDeviceDisconnected,
    StreamPlayerError,
}
