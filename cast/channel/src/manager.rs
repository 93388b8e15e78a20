use crate::bus::BusConnection;
use crate::{
    Channel, ChannelError, ChannelListener, ChannelManagerListener, ChannelRequest, Connection,
    ConnectionListener, Result, TcpConnection,
};
use parking_lot::Mutex;
use rtsp_types::{EndType, LinkType, ModuleType};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Creates and destroys the channels of one session.
///
/// Connections are keyed by the full [`ChannelRequest`]; at most one
/// connection exists per key. The role table decides whether the local side
/// listens or connects.
pub struct ChannelManager {
    session_index: i32,
    connection_num: AtomicU32,
    connections: Mutex<HashMap<ChannelRequest, Arc<dyn Connection>>>,
    inner: Arc<InnerConnectionListener>,
}

impl ChannelManager {
    pub fn new(session_index: i32, listener: Weak<dyn ChannelManagerListener>) -> Self {
        Self {
            session_index,
            connection_num: AtomicU32::new(0),
            connections: Mutex::new(HashMap::new()),
            inner: Arc::new(InnerConnectionListener { listener }),
        }
    }

    pub fn session_index(&self) -> i32 {
        self.session_index
    }

    fn is_request_valid(request: &ChannelRequest) -> bool {
        match request.link_type {
            LinkType::SoftBus => {
                if request.remote_device.device_id.is_empty() {
                    log::error!("bus request without remote device id");
                    return false;
                }
                true
            }
            LinkType::Tcp | LinkType::Vtp => {
                if request.remote_device.ip_address.is_empty() {
                    log::error!("{:?} request without remote ip", request.link_type);
                    return false;
                }
                true
            }
        }
    }

    /// Create the channel for `request` and start it according to the role
    /// table. Returns the locally relevant port (bound port for listeners).
    pub async fn create_channel(
        &self,
        mut request: ChannelRequest,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<i32> {
        if !Self::is_request_valid(&request) {
            return Err(ChannelError::InvalidRequest);
        }
        request.connection_id = self.connection_num.fetch_add(1, Ordering::SeqCst) + 1;

        let is_vtp = request.link_type == LinkType::Vtp;
        let is_sink = request.end_type == EndType::Sink;
        let listen = (is_vtp && is_sink) || (!is_vtp && !is_sink);

        if is_vtp {
            // TODO: route VTP over its own reliable-UDP transport once the
            // link exists; until then it shares the TCP connection
            log::info!("vtp link requested, carried over tcp");
        }

        let connection: Arc<dyn Connection> = match request.link_type {
            LinkType::SoftBus => {
                BusConnection::new(request.clone(), !listen, listener, self.inner.clone())
            }
            LinkType::Tcp | LinkType::Vtp => {
                TcpConnection::new(request.clone(), listener, self.inner.clone())
            }
        };

        match self.connections.lock().entry(request.clone()) {
            Entry::Occupied(_) => {
                log::error!(
                    "a connection for module {} already exists",
                    request.module_type
                );
                return Err(ChannelError::DuplicateRequest);
            }
            Entry::Vacant(e) => {
                e.insert(connection.clone());
            }
        }

        tracing::debug!(
            module = %request.module_type,
            link = ?request.link_type,
            listen,
            "create channel"
        );

        if listen {
            connection.start_listen().await
        } else {
            connection.start_connection().await
        }
    }

    /// Close and remove the channel created for `request`.
    pub async fn destroy_channel(&self, request: &ChannelRequest) -> bool {
        let removed = self.connections.lock().remove(request);
        match removed {
            Some(connection) => {
                connection.close().await;
                true
            }
            None => {
                log::error!("no channel found for module {}", request.module_type);
                false
            }
        }
    }

    /// Close and remove the first channel of `module`.
    pub async fn destroy_channel_of_module(&self, module: ModuleType) -> bool {
        let removed = {
            let mut map = self.connections.lock();
            let key = map.keys().find(|r| r.module_type == module).cloned();
            key.and_then(|k| map.remove(&k))
        };
        match removed {
            Some(connection) => {
                connection.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn destroy_all_channels(&self) {
        let connections: Vec<_> = {
            let mut map = self.connections.lock();
            map.drain().map(|(_, c)| c).collect()
        };
        for connection in connections {
            connection.close().await;
        }
    }

    /// The live channel of `module`, when one exists.
    pub fn channel_of_module(&self, module: ModuleType) -> Option<Arc<dyn Channel>> {
        let map = self.connections.lock();
        map.iter()
            .find(|(r, _)| r.module_type == module)
            .map(|(_, c)| c.clone().channel())
    }
}

/// Forwards transport events to the session's channel-manager listener,
/// promoting the weak reference before every callback.
struct InnerConnectionListener {
    listener: Weak<dyn ChannelManagerListener>,
}

impl InnerConnectionListener {
    fn upstream(&self) -> Option<Arc<dyn ChannelManagerListener>> {
        let listener = self.listener.upgrade();
        if listener.is_none() {
            log::error!("channel manager listener is gone");
        }
        listener
    }
}

impl ConnectionListener for InnerConnectionListener {
    fn on_connection_opened(&self, channel: Arc<dyn Channel>) {
        if let Some(listener) = self.upstream() {
            listener.on_channel_created(channel);
        }
    }

    fn on_connection_connect_failed(&self, request: &ChannelRequest, error_code: i32) {
        if let Some(listener) = self.upstream() {
            listener.on_channel_open_failed(request, error_code);
        }
    }

    fn on_connection_error(&self, channel: Arc<dyn Channel>, error_code: i32) {
        if let Some(listener) = self.upstream() {
            listener.on_channel_error(channel, error_code);
        }
    }

    fn on_connection_closed(&self, channel: Arc<dyn Channel>) {
        if let Some(listener) = self.upstream() {
            listener.on_channel_removed(channel);
        }
    }
}
