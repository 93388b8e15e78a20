//! Adapter over the opaque system bus.
//!
//! The bus provides its own confidentiality and reliability; this module
//! only maps channel requests onto bus sessions and demultiplexes the bus
//! callbacks back to per-session connections through a process-wide
//! registry keyed by session name. Session names must be globally unique
//! within the process.

use crate::{
    Channel, ChannelError, ChannelListener, ChannelRequest, Connection, ConnectionListener, Result,
};
use parking_lot::Mutex;
use rtsp_types::ModuleType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

const PACKAGE_NAME: &str = "castlink";
const SESSION_NAME_PREFIX: &str = "CastPlusNetSession";

/// Payload kinds the bus distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusPayloadKind {
    Bytes,
    Stream,
    File,
}

/// Payload kind a module's data travels as.
pub fn payload_kind(module: ModuleType) -> BusPayloadKind {
    match module {
        ModuleType::Auth
        | ModuleType::Rtsp
        | ModuleType::Rtcp
        | ModuleType::RemoteControl
        | ModuleType::Stream
        | ModuleType::UiBytes => BusPayloadKind::Bytes,
        ModuleType::Video | ModuleType::Audio => BusPayloadKind::Stream,
        ModuleType::UiFiles => BusPayloadKind::File,
    }
}

fn module_factor(module: ModuleType) -> &'static str {
    match module {
        ModuleType::Auth => "AUTH",
        ModuleType::Rtsp => "RTSP",
        ModuleType::Rtcp => "RTCP",
        ModuleType::Audio => "AUDIO",
        ModuleType::Video => "VIDEO",
        ModuleType::RemoteControl => "CONTROL",
        ModuleType::Stream => "CAST_STREAM",
        ModuleType::UiFiles => "FILES",
        ModuleType::UiBytes => "BYTES",
    }
}

/// Deterministic session name of a module's bus session.
pub fn session_name(module: ModuleType, session_id: i32) -> String {
    format!("{SESSION_NAME_PREFIX}{}{session_id}", module_factor(module))
}

/// Callbacks delivered by the bus implementation.
#[derive(Debug)]
pub enum BusEvent {
    SessionOpened { session_id: i32, result: i32 },
    SessionClosed { session_id: i32 },
    BytesReceived { session_id: i32, data: Vec<u8> },
    StreamReceived { session_id: i32, data: Vec<u8> },
}

/// Operations the bus implementation must provide. Injectable so tests can
/// run against an in-process fake.
pub trait BusBackend: Send + Sync {
    fn create_session_server(&self, package: &str, session_name: &str) -> i32;
    fn remove_session_server(&self, package: &str, session_name: &str) -> i32;

    /// Open a session towards `peer_network_id`; returns an opaque positive
    /// session id on success.
    fn open_session(
        &self,
        my_name: &str,
        peer_name: &str,
        peer_network_id: &str,
        kind: BusPayloadKind,
    ) -> i32;
    fn close_session(&self, session_id: i32);

    fn send_bytes(&self, session_id: i32, data: &[u8]) -> i32;
    fn send_stream(&self, session_id: i32, data: &[u8]) -> i32;
    fn send_file(&self, session_id: i32, files: &[String]) -> i32;

    fn my_session_name(&self, session_id: i32) -> String;
    fn peer_session_name(&self, session_id: i32) -> String;
    fn peer_device_id(&self, session_id: i32) -> String;
}

static REGISTRY: Mutex<Option<Arc<BusRegistry>>> = Mutex::new(None);

/// Process-wide registry of bus connections.
pub struct BusRegistry {
    backend: Arc<dyn BusBackend>,
    connections: Mutex<HashMap<String, Arc<BusConnection>>>,
    id_to_name: Mutex<HashMap<i32, String>>,
}

impl BusRegistry {
    /// Install the backend. Must be called before any bus channel is
    /// created.
    pub fn init(backend: Arc<dyn BusBackend>) {
        *REGISTRY.lock() = Some(Arc::new(BusRegistry {
            backend,
            connections: Mutex::new(HashMap::new()),
            id_to_name: Mutex::new(HashMap::new()),
        }));
    }

    /// Drop the registry and every connection it tracks.
    pub fn teardown() {
        *REGISTRY.lock() = None;
    }

    pub fn instance() -> Option<Arc<BusRegistry>> {
        REGISTRY.lock().clone()
    }

    /// Entry point for bus callbacks.
    pub fn dispatch(event: BusEvent) {
        let Some(registry) = Self::instance() else {
            log::error!("bus event dropped, registry not initialized");
            return;
        };
        registry.handle(event);
    }

    fn handle(&self, event: BusEvent) {
        match event {
            BusEvent::SessionOpened { session_id, result } => {
                let Some(conn) = self.connection_by_id(session_id) else {
                    log::error!("session opened for unknown id {session_id}");
                    return;
                };
                conn.passive_close.store(false, Ordering::SeqCst);
                if !conn.actively_open {
                    conn.set_session_id(self, session_id);
                }

                let Some(listener) = conn.connection_listener() else {
                    return;
                };
                if result != 0 {
                    log::error!(
                        "bus session open failed, name = {}, result = {result}",
                        conn.session_name
                    );
                    listener.on_connection_connect_failed(&conn.request, result);
                } else {
                    listener.on_connection_opened(conn.clone().channel());
                }
            }
            BusEvent::SessionClosed { session_id } => {
                let Some(conn) = self.connection_by_id(session_id) else {
                    log::error!("session closed for unknown id {session_id}");
                    return;
                };
                conn.passive_close.store(true, Ordering::SeqCst);
                conn.close_inner(self);
                if let Some(listener) = conn.connection_listener() {
                    listener.on_connection_closed(conn.clone().channel());
                }
            }
            BusEvent::BytesReceived { session_id, data }
            | BusEvent::StreamReceived { session_id, data } => {
                let Some(conn) = self.connection_by_id(session_id) else {
                    log::error!("data received for unknown id {session_id}");
                    return;
                };
                let Some(listener) = conn.data_listener() else {
                    log::error!("no data listener on {}", conn.session_name);
                    return;
                };
                listener.on_data_received(&data);
            }
        }
    }

    fn connection_by_id(&self, session_id: i32) -> Option<Arc<BusConnection>> {
        let name = match self.id_to_name.lock().get(&session_id) {
            Some(name) => name.clone(),
            None => self.backend.my_session_name(session_id),
        };
        if name.is_empty() {
            return None;
        }
        self.connections.lock().get(&name).cloned()
    }

    fn register(&self, name: &str, conn: Arc<BusConnection>) {
        self.connections.lock().insert(name.to_string(), conn);
    }

    fn unregister(&self, name: &str) {
        self.connections.lock().remove(name);
    }
}

/// One channel mapped onto a bus session.
pub struct BusConnection {
    request: ChannelRequest,
    session_name: String,
    kind: BusPayloadKind,
    session_id: AtomicI32,
    /// `true` when this side opened the session (client role).
    actively_open: bool,
    /// Set by a remote close so the redundant local close is skipped.
    passive_close: AtomicBool,
    closed: AtomicBool,

    listener: Mutex<Option<Arc<dyn ChannelListener>>>,
    connection_listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
}

impl BusConnection {
    pub fn new(
        request: ChannelRequest,
        actively_open: bool,
        listener: Arc<dyn ChannelListener>,
        connection_listener: Arc<dyn ConnectionListener>,
    ) -> Arc<Self> {
        let name = session_name(request.module_type, request.remote_device.session_id);
        let kind = payload_kind(request.module_type);
        Arc::new(Self {
            request,
            session_name: name,
            kind,
            session_id: AtomicI32::new(-1),
            actively_open,
            passive_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
            connection_listener: Mutex::new(Some(connection_listener)),
        })
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    fn data_listener(&self) -> Option<Arc<dyn ChannelListener>> {
        self.listener.lock().clone()
    }

    fn connection_listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        self.connection_listener.lock().clone()
    }

    fn set_session_id(&self, registry: &BusRegistry, session_id: i32) {
        self.session_id.store(session_id, Ordering::SeqCst);
        registry
            .id_to_name
            .lock()
            .insert(session_id, self.session_name.clone());
    }

    fn registry() -> Result<Arc<BusRegistry>> {
        BusRegistry::instance().ok_or(ChannelError::BusNotInitialized)
    }

    fn close_inner(&self, registry: &BusRegistry) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        registry.unregister(&self.session_name);

        let session_id = self.session_id.load(Ordering::SeqCst);
        if !self.passive_close.swap(false, Ordering::SeqCst) {
            registry.backend.close_session(session_id);
        }
        registry.id_to_name.lock().remove(&session_id);
        registry
            .backend
            .remove_session_server(PACKAGE_NAME, &self.session_name);
        log::debug!("bus connection {} closed", self.session_name);
    }

    /// Send a file batch (modules with the file payload kind).
    pub fn send_files(&self, files: &[String]) -> bool {
        let Ok(registry) = Self::registry() else {
            return false;
        };
        let id = self.session_id.load(Ordering::SeqCst);
        registry.backend.send_file(id, files) == 0
    }
}

#[async_trait::async_trait]
impl Connection for BusConnection {
    async fn start_connection(self: Arc<Self>) -> Result<i32> {
        let registry = Self::registry()?;

        let ret = registry
            .backend
            .create_session_server(PACKAGE_NAME, &self.session_name);
        if ret != 0 {
            log::error!("bus service start failed, name = {}", self.session_name);
            if let Some(l) = self.connection_listener() {
                l.on_connection_connect_failed(&self.request, ret);
            }
            return Err(ChannelError::BusSetupFailed(ret));
        }

        if self.request.remote_device.network_id.is_empty() {
            if let Some(l) = self.connection_listener() {
                l.on_connection_connect_failed(&self.request, -1);
            }
            return Err(ChannelError::InvalidRequest);
        }

        // peer session names mirror ours by construction
        let session_id = registry.backend.open_session(
            &self.session_name,
            &self.session_name,
            &self.request.remote_device.network_id,
            self.kind,
        );
        if session_id <= 0 {
            log::error!(
                "bus open failed, name = {}, id = {session_id}",
                self.session_name
            );
            if let Some(l) = self.connection_listener() {
                l.on_connection_connect_failed(&self.request, session_id);
            }
            return Err(ChannelError::BusSetupFailed(session_id));
        }

        self.set_session_id(&registry, session_id);
        registry.register(&self.session_name, self.clone());

        Ok(self.request.remote_device.session_id)
    }

    async fn start_listen(self: Arc<Self>) -> Result<i32> {
        let registry = Self::registry()?;

        let ret = registry
            .backend
            .create_session_server(PACKAGE_NAME, &self.session_name);
        if ret != 0 {
            log::error!(
                "bus service start failed when listening, name = {}",
                self.session_name
            );
        }
        registry.register(&self.session_name, self.clone());

        Ok(self.request.remote_device.session_id)
    }

    async fn close(self: Arc<Self>) {
        if let Ok(registry) = Self::registry() {
            self.close_inner(&registry);
        }
    }

    fn channel(self: Arc<Self>) -> Arc<dyn Channel> {
        self
    }

    fn request(&self) -> &ChannelRequest {
        &self.request
    }
}

#[async_trait::async_trait]
impl Channel for BusConnection {
    fn request(&self) -> &ChannelRequest {
        &self.request
    }

    async fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            log::error!("refusing to send empty bus payload");
            return false;
        }
        let Ok(registry) = Self::registry() else {
            return false;
        };
        let id = self.session_id.load(Ordering::SeqCst);

        let ret = match self.kind {
            BusPayloadKind::Stream => registry.backend.send_stream(id, data),
            _ => registry.backend.send_bytes(id, data),
        };
        ret == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_names_are_deterministic() {
        assert_eq!(session_name(ModuleType::Rtsp, 3), "CastPlusNetSessionRTSP3");
        assert_eq!(session_name(ModuleType::Stream, 7), "CastPlusNetSessionCAST_STREAM7");
        assert_eq!(session_name(ModuleType::RemoteControl, 0), "CastPlusNetSessionCONTROL0");
    }

    #[test]
    fn payload_kinds_follow_module() {
        assert_eq!(payload_kind(ModuleType::Rtsp), BusPayloadKind::Bytes);
        assert_eq!(payload_kind(ModuleType::Stream), BusPayloadKind::Bytes);
        assert_eq!(payload_kind(ModuleType::Video), BusPayloadKind::Stream);
        assert_eq!(payload_kind(ModuleType::Audio), BusPayloadKind::Stream);
        assert_eq!(payload_kind(ModuleType::UiFiles), BusPayloadKind::File);
        assert_eq!(payload_kind(ModuleType::UiBytes), BusPayloadKind::Bytes);
    }
}
