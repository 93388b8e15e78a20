//! Channel and connection abstraction of the cast engine.
//!
//! A [`ChannelRequest`] names one logical channel (module + link + role);
//! the [`ChannelManager`] turns it into a live [`Connection`] — either a
//! length-framed TCP connection or an adapter over the opaque system bus —
//! and wires transport events back to the session through listener traits.
//!
//! Whether a side listens or connects is pinned by the role:
//!
//! | link \ role | sink    | source  |
//! |-------------|---------|---------|
//! | VTP         | listen  | connect |
//! | TCP         | connect | listen  |
//! | bus         | connect | listen  |

pub mod bus;
mod codec;
mod error;
mod listener;
mod manager;
mod request;
mod tcp;

pub use codec::{FrameCodec, MAX_FRAME_SIZE, PACKET_HEADER_LEN};
pub use error::ChannelError;
pub use listener::{Channel, ChannelListener, ChannelManagerListener, Connection, ConnectionListener};
pub use manager::ChannelManager;
pub use request::{ChannelRequest, DeviceInfo, INVALID_PORT};
pub use tcp::TcpConnection;

pub type Result<T> = std::result::Result<T, ChannelError>;
