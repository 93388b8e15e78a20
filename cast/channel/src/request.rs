use rtsp_types::{DeviceType, EndType, LinkType, ModuleType, ProtocolType};
use std::hash::{Hash, Hasher};

pub const INVALID_PORT: i32 = -1;

/// Identity of a remote or local device as far as transports care.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub device_id: String,
    /// Network id the bus dials; resolved by device management upstream.
    pub network_id: String,
    pub ip_address: String,
    pub device_type: DeviceType,
    /// Bus session id of the device; also feeds the bus session name.
    pub session_id: i32,
}

/// Uniquely identifies one logical channel of a session.
///
/// Equality and hashing ignore `connection_id` — the id is allocated by the
/// channel manager after the request is formed, and the connection map must
/// hold at most one connection per logical request.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub module_type: ModuleType,
    pub link_type: LinkType,
    pub end_type: EndType,
    pub protocol_type: ProtocolType,
    pub connection_id: u32,
    pub local_device: DeviceInfo,
    pub remote_device: DeviceInfo,
    pub local_port: i32,
    /// Remote TCP port, or the peer session id for bus links.
    pub remote_port: i32,
    /// Whether this side spawns a receive loop for the channel.
    pub is_receiver: bool,
}

impl ChannelRequest {
    fn key(&self) -> (ModuleType, LinkType, EndType, &str, &str, i32, i32, bool) {
        (
            self.module_type,
            self.link_type,
            self.end_type,
            self.local_device.device_id.as_str(),
            self.remote_device.device_id.as_str(),
            self.local_port,
            self.remote_port,
            self.is_receiver,
        )
    }
}

impl PartialEq for ChannelRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ChannelRequest {}

impl Hash for ChannelRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
