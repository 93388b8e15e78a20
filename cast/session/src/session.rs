use crate::handler::{HandleMessage, Handler, Message};
use channel::{
    Channel, ChannelListener, ChannelManager, ChannelManagerListener, ChannelRequest, DeviceInfo,
};
use parking_lot::Mutex;
use rtsp::{RtspController, RtspListener};
use rtsp_types::{
    EndType, EventId, LinkType, ModuleType, ParamInfo, ProtocolType,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use stream::local::LocalFileChannelServer;
use stream::{
    StreamBridgeClient, StreamBridgeServer, StreamListener, MODULE_EVENT_ID_CALLBACK_EVENT,
    MODULE_EVENT_ID_CHANNEL_CREATE, MODULE_EVENT_ID_CHANNEL_DESTROY, MODULE_EVENT_ID_CONTROL_EVENT,
};

const VIDEO_CHANNEL_CONNECTED: u32 = 1 << 0;
const AUDIO_CHANNEL_CONNECTED: u32 = 1 << 1;

/// Module id the stream bridge uses inside RTSP event-change messages.
pub const STREAM_MODULE_ID: i32 = 6;

/// Session message ids handled on the session queue.
pub mod msg_id {
    pub const MSG_ERROR: i32 = 0;
    pub const MSG_SETUP: i32 = 1;
    pub const MSG_PLAY_REQ: i32 = 2;
    pub const MSG_PAUSE_REQ: i32 = 3;
    pub const MSG_PROCESS_TRIGGER_REQ: i32 = 4;
    pub const MSG_PEER_RENDER_READY: i32 = 5;
    pub const MSG_STREAM_SEND_ACTION: i32 = 6;
}

/// Static configuration of one session, immutable after start apart from
/// the protocol switch into stream mode.
#[derive(Debug, Clone)]
pub struct SessionProperty {
    pub end_type: EndType,
    pub protocol_type: ProtocolType,
    pub session_id: i32,
    pub local_device: DeviceInfo,
    pub remote_device: DeviceInfo,
    pub param: ParamInfo,
}

/// Surface the session exposes to its embedder.
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: EventId, data: &str);
    fn on_session_error(&self, error_code: i32);

    fn on_setup(&self, _param: &ParamInfo, _media_port: i32, _remote_control_port: i32) {}
    fn on_play(&self) {}
    fn on_pause(&self) {}
    fn on_tear_down(&self) {}
}

/// Ties the engines of one cast session together: the channel manager, the
/// control engine and — in stream mode — the player bridge.
///
/// All listener implementations hold the session weakly and promote before
/// every callback; the session never stores a strong pointer upward.
pub struct CastSession {
    property: Mutex<SessionProperty>,
    listener: Weak<dyn SessionEventListener>,

    rtsp: Arc<RtspController>,
    channel_manager: ChannelManager,
    handler: Mutex<Option<Arc<Handler>>>,

    bridge_client: Mutex<Option<Arc<StreamBridgeClient>>>,
    bridge_server: Mutex<Option<Arc<StreamBridgeServer>>>,
    file_server: Mutex<Option<Arc<LocalFileChannelServer>>>,
    stream_channel: Mutex<Option<Arc<dyn Channel>>>,

    // the listener impls live exactly as long as the session
    rtsp_listener: Arc<SessionRtspListener>,
    manager_listener: Arc<SessionChannelManagerListener>,
    stream_listener: Arc<SessionStreamListener>,
    stream_channel_listener: Arc<SessionStreamChannelListener>,
}

impl CastSession {
    pub fn new(
        property: SessionProperty,
        listener: Weak<dyn SessionEventListener>,
    ) -> Arc<Self> {
        let session = Arc::new_cyclic(|weak: &Weak<CastSession>| {
            let rtsp_listener = Arc::new(SessionRtspListener {
                session: weak.clone(),
            });
            let manager_listener = Arc::new(SessionChannelManagerListener {
                session: weak.clone(),
                media_channel_state: AtomicU32::new(0),
            });
            let stream_listener = Arc::new(SessionStreamListener {
                session: weak.clone(),
            });
            let stream_channel_listener = Arc::new(SessionStreamChannelListener {
                session: weak.clone(),
            });

            let rtsp = RtspController::new(
                Arc::downgrade(&rtsp_listener) as Weak<dyn RtspListener>,
                property.protocol_type,
                property.end_type,
            );
            let channel_manager = ChannelManager::new(
                property.session_id,
                Arc::downgrade(&manager_listener) as Weak<dyn ChannelManagerListener>,
            );

            CastSession {
                property: Mutex::new(property),
                listener,
                rtsp,
                channel_manager,
                handler: Mutex::new(None),
                bridge_client: Mutex::new(None),
                bridge_server: Mutex::new(None),
                file_server: Mutex::new(None),
                stream_channel: Mutex::new(None),
                rtsp_listener,
                manager_listener,
                stream_listener,
                stream_channel_listener,
            }
        });

        let handler = Arc::new(Handler::new(session.clone() as Arc<dyn HandleMessage>));
        *session.handler.lock() = Some(handler);
        session
    }

    pub fn property(&self) -> SessionProperty {
        self.property.lock().clone()
    }

    pub fn rtsp(&self) -> &Arc<RtspController> {
        &self.rtsp
    }

    pub fn channel_manager(&self) -> &ChannelManager {
        &self.channel_manager
    }

    /// The listener the channel layer reports into; exposed for embedders
    /// wiring channels outside [`Self::channel_manager`].
    pub fn channel_manager_listener(&self) -> Arc<dyn ChannelManagerListener> {
        self.manager_listener.clone()
    }

    pub fn set_media_channel(&self, module: ModuleType) {
        self.manager_listener.set_media_channel(module);
    }

    pub fn is_media_channel_ready(&self) -> bool {
        self.manager_listener.is_media_channel_ready()
    }

    pub fn is_sink(&self) -> bool {
        self.property.lock().end_type == EndType::Sink
    }

    pub fn is_stream_mode(&self) -> bool {
        self.property.lock().protocol_type == ProtocolType::Stream
    }

    fn listener(&self) -> Option<Arc<dyn SessionEventListener>> {
        let listener = self.listener.upgrade();
        if listener.is_none() {
            log::error!("session listener is gone");
        }
        listener
    }

    fn send_session_message(&self, msg: Message) {
        if let Some(handler) = self.handler.lock().clone() {
            handler.send_message(msg);
        }
    }

    /// Start the control engine with the pairing key.
    pub fn start(&self, session_key: &[u8]) -> bool {
        let param = self.property.lock().param.clone();
        self.rtsp.start(&param, session_key)
    }

    pub async fn stop(&self) {
        self.rtsp.stop_engine();
        self.channel_manager.destroy_all_channels().await;
        if let Some(server) = self.bridge_server.lock().clone() {
            server.shutdown();
        }
        if let Some(client) = self.bridge_client.lock().clone() {
            client.shutdown();
        }
        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            handler.stop_safely(true);
            handler.join().await;
        }
    }

    /// Build the channel request of `module` from the session's device
    /// pair.
    pub fn channel_request(&self, module: ModuleType, link: LinkType) -> ChannelRequest {
        let property = self.property.lock();
        ChannelRequest {
            module_type: module,
            link_type: link,
            end_type: property.end_type,
            protocol_type: property.protocol_type,
            connection_id: 0,
            local_device: property.local_device.clone(),
            remote_device: property.remote_device.clone(),
            local_port: channel::INVALID_PORT,
            remote_port: if link == LinkType::SoftBus {
                property.remote_device.session_id
            } else {
                channel::INVALID_PORT
            },
            is_receiver: true,
        }
    }

    /// Create the control channel; the RTSP engine attaches once the
    /// transport reports it open.
    pub async fn create_control_channel(&self, link: LinkType) -> channel::Result<i32> {
        let request = self.channel_request(ModuleType::Rtsp, link);
        self.channel_manager
            .create_channel(request, self.rtsp.channel_listener())
            .await
    }

    /// Create the stream-mode action channel.
    pub async fn create_stream_channel(&self, link: LinkType) -> channel::Result<i32> {
        let request = self.channel_request(ModuleType::Stream, link);
        self.channel_manager
            .create_channel(request, self.stream_channel_listener.clone())
            .await
    }

    /// Create the local-file data channel (source answers the sink's
    /// create-channel event with this).
    pub async fn create_file_channel(&self, link: LinkType) -> channel::Result<i32> {
        let listener: Arc<dyn ChannelListener> = if self.is_sink() {
            let Some(server) = self.bridge_server.lock().clone() else {
                return Err(channel::ChannelError::InvalidRequest);
            };
            server.channel_listener()
        } else {
            self.ensure_file_server()
        };
        let request = self.channel_request(ModuleType::UiBytes, link);
        self.channel_manager.create_channel(request, listener).await
    }

    /// The source-side bridge; created on first use in stream mode.
    pub fn stream_bridge_client(&self) -> Arc<StreamBridgeClient> {
        let mut client = self.bridge_client.lock();
        if let Some(client) = client.as_ref() {
            return client.clone();
        }
        let created = StreamBridgeClient::new(self.stream_listener.clone(), false);
        *client = Some(created.clone());
        created
    }

    /// The sink-side bridge; created on first use in stream mode.
    pub fn stream_bridge_server(&self) -> Arc<StreamBridgeServer> {
        let mut server = self.bridge_server.lock();
        if let Some(server) = server.as_ref() {
            return server.clone();
        }
        let created = StreamBridgeServer::new(self.stream_listener.clone());
        *server = Some(created.clone());
        created
    }

    fn ensure_file_server(&self) -> Arc<LocalFileChannelServer> {
        let mut server = self.file_server.lock();
        if let Some(server) = server.as_ref() {
            return server.clone();
        }
        let created = LocalFileChannelServer::new();
        *server = Some(created.clone());
        created
    }

    /// Remote-player surface of the source application.
    pub fn remote_player(&self) -> stream::RemotePlayerController {
        stream::RemotePlayerController::new(self.stream_bridge_client(), self.ensure_file_server())
    }

    // ---- event routing -------------------------------------------------

    /// Events arriving through the RTSP `SEND_EVENT_CHANGE` path.
    fn process_rtsp_event(&self, module_id: i32, event: i32, param: &str) {
        if module_id != STREAM_MODULE_ID {
            log::warn!("event change for unhandled module {module_id}");
            return;
        }
        self.process_stream_event(event, param);
    }

    fn process_stream_event(&self, event: i32, param: &str) {
        match event {
            MODULE_EVENT_ID_CONTROL_EVENT | MODULE_EVENT_ID_CALLBACK_EVENT => {
                if self.is_sink() {
                    self.stream_bridge_server().process_actions_event(event, param);
                } else {
                    self.stream_bridge_client().process_actions_event(event, param);
                }
            }
            MODULE_EVENT_ID_CHANNEL_CREATE => {
                // the sink asked for the local-file channel
                if !self.is_sink() {
                    let session = self.rtsp_listener.session.clone();
                    tokio::spawn(async move {
                        if let Some(session) = session.upgrade() {
                            let link = session.control_link();
                            if let Err(e) = session.create_file_channel(link).await {
                                log::error!("creating file channel failed: {e}");
                            }
                        }
                    });
                }
            }
            MODULE_EVENT_ID_CHANNEL_DESTROY => {
                let session = self.rtsp_listener.session.clone();
                tokio::spawn(async move {
                    if let Some(session) = session.upgrade() {
                        session
                            .channel_manager
                            .destroy_channel_of_module(ModuleType::UiBytes)
                            .await;
                    }
                });
            }
            _ => log::warn!("unhandled stream event {event}"),
        }
    }

    fn control_link(&self) -> LinkType {
        // mirror the control channel's link for auxiliary channels
        if self.rtsp.net().is_softbus() {
            LinkType::SoftBus
        } else {
            LinkType::Tcp
        }
    }

    /// Ship one serialized bridge action to the peer: over the dedicated
    /// stream channel when it is up, through the control channel otherwise.
    fn send_stream_action(&self, event_id: i32, param: &str) -> bool {
        let stream_channel = self.stream_channel.lock().clone();
        let rtsp = self.rtsp.clone();
        let param = param.to_string();

        let sendable_inline = matches!(
            event_id,
            MODULE_EVENT_ID_CONTROL_EVENT | MODULE_EVENT_ID_CALLBACK_EVENT
        );

        tokio::spawn(async move {
            let sent = match stream_channel {
                Some(channel) if sendable_inline => channel.send(param.as_bytes()).await,
                _ => rtsp.send_event_change(STREAM_MODULE_ID, event_id, &param).await,
            };
            if !sent {
                log::error!("sending stream action {event_id} failed");
            }
        });
        true
    }
}

impl HandleMessage for CastSession {
    fn handle_message(&self, msg: &Message) {
        match msg.what {
            msg_id::MSG_ERROR => {
                if let Some(listener) = self.listener() {
                    listener.on_session_error(msg.arg1);
                }
            }
            msg_id::MSG_PLAY_REQ => {
                if let Some(listener) = self.listener() {
                    listener.on_play();
                }
            }
            msg_id::MSG_PAUSE_REQ => {
                if let Some(listener) = self.listener() {
                    listener.on_pause();
                }
            }
            msg_id::MSG_PEER_RENDER_READY => {
                if let Some(listener) = self.listener() {
                    listener.on_event(EventId::RenderReady, &msg.str_arg);
                }
            }
            what => log::debug!("unhandled session message {what}"),
        }
    }
}

// ---- listener implementations -----------------------------------------

struct SessionRtspListener {
    session: Weak<CastSession>,
}

impl SessionRtspListener {
    fn session(&self) -> Option<Arc<CastSession>> {
        let session = self.session.upgrade();
        if session.is_none() {
            log::error!("session is gone");
        }
        session
    }
}

impl RtspListener for SessionRtspListener {
    fn on_setup(
        &self,
        param: &ParamInfo,
        media_port: i32,
        remote_control_port: i32,
        _device_id: &str,
    ) {
        let Some(session) = self.session() else {
            return;
        };
        session.property.lock().param = param.clone();

        let listener = session.listener.clone();
        let param = param.clone();
        session.send_session_message(Message::with_task(msg_id::MSG_SETUP, move || {
            if let Some(listener) = listener.upgrade() {
                listener.on_setup(&param, media_port, remote_control_port);
            }
        }));
    }

    fn on_play(&self, _param: &ParamInfo, _port: i32, _device_id: &str) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        session.send_session_message(Message::new(msg_id::MSG_PLAY_REQ));
        true
    }

    fn on_pause(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        session.send_session_message(Message::new(msg_id::MSG_PAUSE_REQ));
        true
    }

    fn on_tear_down(&self) {
        let Some(session) = self.session() else {
            return;
        };
        let listener = session.listener.clone();
        session.send_session_message(Message::with_task(msg_id::MSG_ERROR, move || {
            if let Some(listener) = listener.upgrade() {
                listener.on_tear_down();
            }
        }));
    }

    fn on_error(&self, error_code: i32) {
        let Some(session) = self.session() else {
            return;
        };
        session.send_session_message(Message::with_args(msg_id::MSG_ERROR, error_code, 0));
    }

    fn on_peer_gone(&self) {
        let Some(session) = self.session() else {
            return;
        };
        session.send_session_message(Message::with_args(
            msg_id::MSG_ERROR,
            rtsp::ERROR_CODE_DEFAULT,
            0,
        ));
    }

    fn notify_trigger(&self, trigger: i32) {
        let Some(session) = self.session() else {
            return;
        };
        session.send_session_message(Message::with_args(
            msg_id::MSG_PROCESS_TRIGGER_REQ,
            trigger,
            0,
        ));
    }

    fn notify_event_change(&self, module_id: i32, event: i32, param: &str) {
        let Some(session) = self.session() else {
            return;
        };
        session.process_rtsp_event(module_id, event, param);
    }

    fn notify_module_custom_params_negotiation(&self, _media_params: &str, controller_params: &str) {
        let Some(session) = self.session() else {
            return;
        };
        if session.property.lock().end_type == EndType::Source {
            let negotiated = session
                .stream_bridge_client()
                .handle_custom_negotiation_params(controller_params);
            session
                .rtsp
                .set_negotiated_player_controller_capability(&negotiated);

            let rtsp = session.rtsp.clone();
            tokio::spawn(async move {
                rtsp.module_custom_params_negotiation_done().await;
            });
        }
    }

    fn process_stream_mode(&self, param: &ParamInfo, device_id: &str) {
        let Some(session) = self.session() else {
            return;
        };
        log::info!("entering stream mode");
        {
            let mut property = session.property.lock();
            property.param = param.clone();
            property.protocol_type = ProtocolType::Stream;
        }
        if session.is_sink() {
            session.stream_bridge_server();
        }
        session.send_session_message(Message::with_str(
            msg_id::MSG_PEER_RENDER_READY,
            0,
            device_id,
        ));
    }

    fn on_player_ready(&self, _param: &ParamInfo, device_id: &str, ready_flag: i32) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        session.send_session_message(Message::with_str(
            msg_id::MSG_PEER_RENDER_READY,
            ready_flag,
            device_id,
        ));
        true
    }
}

struct SessionChannelManagerListener {
    session: Weak<CastSession>,
    media_channel_state: AtomicU32,
}

impl SessionChannelManagerListener {
    fn session(&self) -> Option<Arc<CastSession>> {
        let session = self.session.upgrade();
        if session.is_none() {
            log::error!("session is gone");
        }
        session
    }
}

impl ChannelManagerListener for SessionChannelManagerListener {
    fn on_channel_created(&self, channel: Arc<dyn Channel>) {
        let Some(session) = self.session() else {
            return;
        };
        let request = channel.request().clone();
        match request.module_type {
            ModuleType::Rtsp => {
                let rtsp = session.rtsp.clone();
                let device_id = request.remote_device.device_id.clone();
                tokio::spawn(async move {
                    rtsp.add_channel(channel, &device_id).await;
                });
            }
            ModuleType::Stream => {
                *session.stream_channel.lock() = Some(channel);
            }
            ModuleType::UiBytes => {
                if session.is_sink() {
                    session.stream_bridge_server().add_channel(channel);
                } else {
                    session.ensure_file_server().add_channel(channel);
                }
            }
            ModuleType::Video | ModuleType::Audio => {
                self.set_media_channel(request.module_type);
            }
            module => log::debug!("channel of module {module} created"),
        }
    }

    fn on_channel_open_failed(&self, request: &ChannelRequest, error_code: i32) {
        let Some(session) = self.session() else {
            return;
        };
        session.send_session_message(Message::with_str(
            msg_id::MSG_ERROR,
            error_code,
            request.module_type.to_string(),
        ));
    }

    fn on_channel_error(&self, channel: Arc<dyn Channel>, error_code: i32) {
        let Some(session) = self.session() else {
            return;
        };
        session.send_session_message(Message::with_str(
            msg_id::MSG_ERROR,
            error_code,
            channel.request().module_type.to_string(),
        ));
    }

    fn on_channel_removed(&self, channel: Arc<dyn Channel>) {
        let Some(session) = self.session() else {
            return;
        };
        match channel.request().module_type {
            ModuleType::Rtsp => session.rtsp.remove_channel(),
            ModuleType::Stream => {
                *session.stream_channel.lock() = None;
            }
            ModuleType::UiBytes => {
                if session.is_sink() {
                    if let Some(server) = session.bridge_server.lock().clone() {
                        server.remove_channel();
                    }
                } else if let Some(server) = session.file_server.lock().clone() {
                    server.remove_channel();
                }
            }
            module => log::warn!("channel of unhandled module {module} removed"),
        }

        // a sink playing a stream keeps going on buffered content
        if session.is_stream_mode() && session.is_sink() {
            log::info!("stream channel dropped, continuing with buffered playback");
            if let Some(listener) = session.listener() {
                listener.on_event(
                    EventId::StreamDeviceDisconnected,
                    "Connection is disconnected unexpectedly.",
                );
            }
            return;
        }
        session.send_session_message(Message::new(msg_id::MSG_ERROR));
    }

    fn set_media_channel(&self, module: ModuleType) {
        let bit = match module {
            ModuleType::Audio => AUDIO_CHANNEL_CONNECTED,
            ModuleType::Video => VIDEO_CHANNEL_CONNECTED,
            _ => return,
        };
        let state = self.media_channel_state.fetch_or(bit, Ordering::SeqCst) | bit;
        log::info!("media channel state {state:#b} after {module}");
    }

    fn is_media_channel_ready(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        let state = self.media_channel_state.load(Ordering::SeqCst);
        let protocol_type = session.property.lock().protocol_type;
        match protocol_type {
            ProtocolType::Mirror | ProtocolType::Stream | ProtocolType::Cooperation => {
                state == (VIDEO_CHANNEL_CONNECTED | AUDIO_CHANNEL_CONNECTED)
            }
            _ => state == VIDEO_CHANNEL_CONNECTED,
        }
    }
}

struct SessionStreamListener {
    session: Weak<CastSession>,
}

impl StreamListener for SessionStreamListener {
    fn send_action_to_peers(&self, event_id: i32, param: &str) -> bool {
        let Some(session) = self.session.upgrade() else {
            log::error!("session is gone");
            return false;
        };
        session.send_stream_action(event_id, param)
    }

    fn on_render_ready(&self, is_ready: bool) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let rtsp = session.rtsp.clone();
        tokio::spawn(async move {
            rtsp.send_cast_render_ready_option(i32::from(is_ready)).await;
        });
    }

    fn on_event(&self, event: EventId, data: &str) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if let Some(listener) = session.listener() {
            listener.on_event(event, data);
        }
    }
}

/// Listener of the dedicated stream action channel; the event id is derived
/// from the payload's action key.
struct SessionStreamChannelListener {
    session: Weak<CastSession>,
}

impl ChannelListener for SessionStreamChannelListener {
    fn on_data_received(&self, data: &[u8]) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let Ok(text) = std::str::from_utf8(data) else {
            log::error!("stream action payload is not utf-8");
            return;
        };
        let event = if text.contains("\"CALLBACK_ACTION\"") {
            MODULE_EVENT_ID_CALLBACK_EVENT
        } else {
            MODULE_EVENT_ID_CONTROL_EVENT
        };
        session.process_stream_event(event, text);
    }
}
