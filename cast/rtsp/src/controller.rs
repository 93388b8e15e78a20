use crate::net::RtspChannelManager;
use crate::{encap, RtspListener, ERROR_CODE_DEFAULT};
use channel::{Channel, ChannelListener, INVALID_PORT};
use parking_lot::Mutex;
use rtsp_types::parse::{get_target_str, parse_double, parse_int, parse_uint32};
use rtsp_types::{
    ActionType, DeviceType, DeviceTypeParamInfo, EncryptionParamInfo, EndType, Method, ParamInfo,
    ProjectionMode, ProtocolType, RemoteControlParamInfo, RtspMessage, SubDeviceType, VtpType,
    WaitResponse, COMMON_SEPARATOR, INVALID_VALUE, STATUS_OK, STATUS_OK_STR, VIDEO_BITRATE_MAX,
    VIDEO_BITRATE_MIN, VIDEO_FPS_MAX, VIDEO_FPS_MIN, VIDEO_GOP_IPPP, VIDEO_GOP_MAX, VIDEO_GOP_MIN,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Init,
    Started,
    Established,
    Stopping,
    Stopped,
}

/// The control-protocol engine of one session.
///
/// Drives the M1..M9 handshake and records the exchange slot currently
/// expecting a reply; every outgoing request stamps a strictly increasing
/// `CSeq`. Both the local parameter set and the negotiated copy live here;
/// negotiation narrows the copy while M3/M4 are processed.
pub struct RtspController {
    protocol_type: ProtocolType,
    end_type: EndType,
    listener: Weak<dyn RtspListener>,
    net: Arc<RtspChannelManager>,

    state: Mutex<EngineState>,
    device_id: Mutex<String>,
    param_info: Mutex<ParamInfo>,
    negotiated: Mutex<ParamInfo>,

    current_seq: AtomicI32,
    keep_alive_cseq: AtomicI32,
    setup_seq: AtomicI32,
    wait_rsp: Mutex<WaitResponse>,
}

impl RtspController {
    pub fn new(
        listener: Weak<dyn RtspListener>,
        protocol_type: ProtocolType,
        end_type: EndType,
    ) -> Arc<Self> {
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        let controller = Arc::new_cyclic(|weak: &Weak<RtspController>| RtspController {
            protocol_type,
            end_type,
            listener,
            net: Arc::new(RtspChannelManager::new(weak.clone(), data_tx)),
            state: Mutex::new(EngineState::Init),
            device_id: Mutex::new(String::new()),
            param_info: Mutex::new(ParamInfo::default()),
            negotiated: Mutex::new(ParamInfo::default()),
            current_seq: AtomicI32::new(0),
            keep_alive_cseq: AtomicI32::new(0),
            setup_seq: AtomicI32::new(0),
            wait_rsp: Mutex::new(WaitResponse::None),
        });
        controller.net.spawn_worker(data_rx);
        controller
    }

    /// Listener to hand to the channel layer for the control channel.
    pub fn channel_listener(&self) -> Arc<dyn ChannelListener> {
        self.net.clone()
    }

    pub fn net(&self) -> &RtspChannelManager {
        &self.net
    }

    fn listener(&self) -> Option<Arc<dyn RtspListener>> {
        let listener = self.listener.upgrade();
        if listener.is_none() {
            log::error!("rtsp listener is gone");
        }
        listener
    }

    fn report_error(&self) {
        if let Some(listener) = self.listener() {
            listener.on_error(ERROR_CODE_DEFAULT);
        }
    }

    fn next_seq(&self) -> i32 {
        self.current_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn set_wait(&self, wait: WaitResponse) {
        *self.wait_rsp.lock() = wait;
    }

    pub fn wait_rsp(&self) -> WaitResponse {
        *self.wait_rsp.lock()
    }

    fn version(&self) -> f64 {
        self.param_info.lock().version
    }

    fn device_id(&self) -> String {
        self.device_id.lock().clone()
    }

    /// Adopt the session parameters and key and start the engine. The
    /// negotiation watchdog is armed here and cleared once SETUP completes.
    pub fn start(&self, param: &ParamInfo, session_key: &[u8]) -> bool {
        tracing::info!(end_type = ?self.end_type, protocol = ?self.protocol_type, "starting control engine");
        *self.param_info.lock() = param.clone();
        *self.negotiated.lock() = param.clone();
        self.net.start_session(session_key);
        self.net.cfg_neg_timeout(false);
        *self.state.lock() = EngineState::Started;
        true
    }

    pub async fn add_channel(&self, channel: Arc<dyn Channel>, device_id: &str) {
        self.net.add_channel(channel);
        *self.device_id.lock() = device_id.to_string();
        let is_softbus = self.net.is_softbus();
        self.on_peer_ready(is_softbus).await;
    }

    pub fn remove_channel(&self) {
        self.net.remove_channel();
    }

    pub fn stop_engine(&self) -> bool {
        log::debug!("stop engine");
        *self.state.lock() = EngineState::Stopped;
        self.net.stop_session();
        true
    }

    pub fn on_peer_gone(&self) {
        *self.state.lock() = EngineState::Stopping;
        log::error!("peer gone");
        if let Some(listener) = self.listener() {
            listener.on_peer_gone();
        }
    }

    /// Called by the session whenever the channel under the engine opens.
    /// The side that opens last starts talking; the source always waits.
    pub async fn on_peer_ready(&self, is_softbus: bool) {
        if self.end_type == EndType::Source {
            log::debug!("source waits for the sink to start");
            return;
        }

        let sent = if is_softbus {
            let sent = self.send_option_m1m2().await;
            self.set_wait(WaitResponse::OptM2);
            sent
        } else {
            let alg = crypto::algorithm();
            let version = crypto::version();
            log::debug!("announcing encryption algorithm {alg} version {version}");

            let request = encap::announce(alg, self.next_seq(), version);
            let sent = self.net.send_rtsp_data(&request).await;
            self.set_wait(WaitResponse::Announce);
            sent
        };

        if !sent {
            self.report_error();
        }
    }

    // ---- outgoing operations ------------------------------------------

    /// Run one of the RTSP actions. Sources issue triggers, sinks issue the
    /// real PLAY/PAUSE/TEARDOWN requests.
    pub async fn action(&self, action: ActionType) -> bool {
        log::debug!("action {action} as {:?}", self.end_type);

        let request = if self.end_type == EndType::Source {
            self.set_wait(WaitResponse::SetParamM5);
            encap::action_request(action, self.version(), self.next_seq())
        } else {
            match action {
                ActionType::Play => {
                    self.set_wait(WaitResponse::PlayM7);
                    encap::play_request(self.next_seq(), "", INVALID_PORT)
                }
                ActionType::Pause => {
                    self.set_wait(WaitResponse::PauseM9);
                    encap::pause_request(self.next_seq(), "")
                }
                ActionType::Teardown => {
                    self.set_wait(WaitResponse::TeardownM8);
                    encap::teardown_request(self.next_seq(), "")
                }
                _ => {
                    log::error!("no sink request for action {action}");
                    return false;
                }
            }
        };

        let sent = self.net.send_rtsp_data(&request).await;
        if action == ActionType::Teardown {
            self.stop_engine();
        }
        sent
    }

    async fn send_action(&self, action: ActionType) -> bool {
        let request = encap::action_request(action, self.version(), self.next_seq());
        self.net.send_rtsp_data(&request).await
    }

    /// Forward a module event change to the peer.
    pub async fn send_event_change(&self, module_id: i32, event: i32, param: &str) -> bool {
        let request =
            encap::event_change_request(module_id, event, param, self.version(), self.next_seq());
        self.net.send_rtsp_data(&request).await
    }

    /// Answer the peer's SETUP with the locally chosen ports.
    pub async fn setup_port(&self, server_port: i32, remotectl_port: i32, rtcp_port: i32) {
        let response = encap::setup_response(
            self.setup_seq.load(Ordering::SeqCst),
            server_port,
            remotectl_port,
            rtcp_port,
        );
        let sent = self.net.send_rtsp_data(&response).await;
        *self.state.lock() = EngineState::Established;
        if !sent {
            log::error!("sending setup response failed");
            self.report_error();
        }
    }

    pub async fn send_cast_render_ready_option(&self, ready_flag: i32) {
        let request = encap::render_ready_request(self.next_seq(), "", ready_flag);
        if !self.net.send_rtsp_data(&request).await {
            log::error!("sending render ready request failed");
            self.report_error();
            return;
        }
        self.set_wait(WaitResponse::None);
    }

    /// Keep-alive tick: empty GET_PARAMETER tagged with its CSeq.
    pub async fn on_time_keep_alive(&self) -> bool {
        let seq = self.next_seq();
        let request = encap::keep_alive_request(seq, self.version());
        self.keep_alive_cseq.store(seq, Ordering::SeqCst);
        let sent = self.net.send_rtsp_data(&request).await;
        self.set_wait(WaitResponse::KeepAlive);
        sent
    }

    async fn send_option_m1m2(&self) -> bool {
        let request = encap::request_option(self.next_seq());
        self.net.send_rtsp_data(&request).await
    }

    async fn send_get_param_m3(&self) -> bool {
        let request = {
            let param = self.param_info.lock();
            encap::request_get_parameter(&param, self.next_seq())
        };
        self.net.send_rtsp_data(&request).await
    }

    async fn send_set_param_m4(&self) -> bool {
        let request = {
            let negotiated = self.negotiated.lock();
            encap::set_parameter_m4_request(&negotiated, self.version(), "", self.next_seq())
        };
        self.net.send_rtsp_data(&request).await
    }

    /// The module capability negotiation finished upstream; resume with M4.
    pub async fn module_custom_params_negotiation_done(&self) {
        self.send_set_param_m4().await;
        self.set_wait(WaitResponse::SetParamM4);
    }

    pub fn negotiated_param_info(&self) -> ParamInfo {
        self.negotiated.lock().clone()
    }

    pub fn negotiated_feature_set(&self) -> BTreeSet<i32> {
        self.negotiated.lock().feature_set.clone()
    }

    pub fn set_negotiated_media_capability(&self, params: &str) {
        self.negotiated.lock().media_capability = params.to_string();
    }

    pub fn set_negotiated_player_controller_capability(&self, params: &str) {
        self.negotiated.lock().player_controller_capability = params.to_string();
    }

    // ---- request dispatch ---------------------------------------------

    pub(crate) async fn on_request(&self, request: RtspMessage) -> bool {
        let ok = match request.method() {
            Some(method) => {
                if method == Method::ANNOUNCE {
                    self.process_announce_request(&request).await
                } else if method == Method::OPTIONS {
                    self.process_option_request(&request).await
                } else if method == Method::SETUP {
                    self.process_setup_request(&request).await
                } else if method == Method::PLAY {
                    self.process_play_request(&request).await
                } else if method == Method::PAUSE {
                    self.process_pause_request(&request).await
                } else if method == Method::TEARDOWN {
                    self.process_teardown_request(&request).await
                } else if method == Method::RENDER_READY {
                    self.process_render_ready_request(&request).await
                } else if method == Method::SET_PARAMETER {
                    self.process_set_param_request(&request).await
                } else if method == Method::GET_PARAMETER {
                    self.process_get_parameter_request_m3(&request).await
                } else {
                    self.send_error_response(&request).await
                }
            }
            None => self.send_error_response(&request).await,
        };

        if !ok {
            log::error!("request handling failed");
            self.report_error();
        }
        ok
    }

    async fn send_error_response(&self, request: &RtspMessage) -> bool {
        log::error!("unsupported method in '{}'", request.first_line());
        let response = encap::error_response(request, "405 Method Not Allowed");
        self.net.send_rtsp_data(&response).await
    }

    async fn send_common_response(&self, request: &RtspMessage) -> bool {
        let response = encap::common_response(request, STATUS_OK_STR);
        self.net.send_rtsp_data(&response).await
    }

    fn parse_cipher_item(&self, item: &str) -> String {
        for cipher in item.split(", ") {
            if cipher.to_ascii_lowercase() == crypto::ENCRYPT_ALG {
                return crypto::ENCRYPT_ALG.to_string();
            }
        }
        String::new()
    }

    async fn process_announce_request(&self, request: &RtspMessage) -> bool {
        if self.end_type == EndType::Source {
            self.send_common_response(request).await;
        }

        let content = request.header("encrypt_description").unwrap_or_default();
        if content.is_empty() {
            log::error!("announce without encrypt_description");
            self.report_error();
            return false;
        }

        let encrypt_list = get_target_str(content, "encrypt_list=", COMMON_SEPARATOR);
        if encrypt_list.is_empty() {
            log::error!("announce without encrypt_list");
            self.report_error();
            return false;
        }

        // only ctr is supported
        let chosen = self.parse_cipher_item(&encrypt_list);
        if chosen.is_empty() {
            log::error!("no matching cipher in '{encrypt_list}'");
            self.report_error();
            return false;
        }

        let alg_id = crypto::match_algorithm(&chosen);
        self.negotiated.lock().encryption = EncryptionParamInfo {
            control_channel_alg: alg_id,
            data_channel_alg: alg_id,
        };

        if self.end_type == EndType::Source {
            let request = encap::announce(&chosen, self.next_seq(), crypto::version());
            self.net.send_rtsp_data(&request).await;
            self.set_wait(WaitResponse::Announce);
        } else {
            self.send_common_response(request).await;
            self.net.set_neg_algorithm_id(alg_id);
        }
        true
    }

    async fn process_option_request(&self, request: &RtspMessage) -> bool {
        log::debug!("received options request");
        let response = encap::response_option(self.version(), request.cseq());
        if !self.net.send_rtsp_data(&response).await {
            log::error!("sending options response failed");
            return false;
        }

        if self.end_type == EndType::Source {
            self.send_get_param_m3().await;
            self.set_wait(WaitResponse::GetParamM3);
        } else {
            self.send_option_m1m2().await;
            self.set_wait(WaitResponse::OptM2);
        }
        true
    }

    async fn process_setup_request(&self, request: &RtspMessage) -> bool {
        self.setup_seq.store(request.cseq(), Ordering::SeqCst);

        let port = {
            let negotiated = self.negotiated.lock();
            let wants_port = negotiated.device_type.remote_device_type == DeviceType::CastPlus
                || negotiated.vtp != VtpType::NotSupportVideo
                || self.protocol_type == ProtocolType::HiCar
                || self.protocol_type == ProtocolType::SuperLauncher;
            drop(negotiated);
            if wants_port {
                self.process_get_port(request)
            } else {
                INVALID_VALUE
            }
        };

        self.net.cfg_neg_timeout(true);
        if let Some(listener) = self.listener() {
            listener.on_setup(
                &self.negotiated_param_info(),
                port,
                INVALID_VALUE,
                &self.device_id(),
            );
        }
        true
    }

    async fn process_play_request(&self, request: &RtspMessage) -> bool {
        log::debug!("received play request");
        let mut response = encap::common_response(request, STATUS_OK_STR);
        response.push_str("Session: timeout=30\n");
        response.push_str("Range: npt=now-\n");

        let sent = self.net.send_rtsp_data(&response).await;
        if !sent {
            log::error!("sending play response failed");
        }

        let port = if self.negotiated.lock().vtp != VtpType::NotSupportVideo {
            self.process_get_port(request)
        } else {
            INVALID_VALUE
        };

        let Some(listener) = self.listener() else {
            return false;
        };
        listener.on_play(&self.negotiated_param_info(), port, &self.device_id()) && sent
    }

    async fn process_pause_request(&self, request: &RtspMessage) -> bool {
        log::debug!("received pause request");
        let sent = self.send_common_response(request).await;
        if !sent {
            log::error!("sending pause response failed");
        }

        let Some(listener) = self.listener() else {
            return false;
        };
        listener.on_pause() && sent
    }

    async fn process_teardown_request(&self, request: &RtspMessage) -> bool {
        log::debug!("received teardown request");
        let sent = self.send_common_response(request).await;
        self.stop_engine();

        if let Some(listener) = self.listener() {
            listener.on_tear_down();
        }
        sent
    }

    async fn process_render_ready_request(&self, request: &RtspMessage) -> bool {
        log::debug!("received render ready request");
        let sent = self.send_common_response(request).await;

        let ready_flag = request
            .header("readyflag")
            .and_then(parse_int)
            .unwrap_or(INVALID_VALUE);
        if !sent {
            log::error!("sending render ready response failed");
        }

        let Some(listener) = self.listener() else {
            return false;
        };
        listener.on_player_ready(&self.negotiated_param_info(), &self.device_id(), ready_flag)
            && sent
    }

    async fn process_get_parameter_request_m3(&self, request: &RtspMessage) -> bool {
        log::debug!("received get parameter request");
        let response = {
            let param = self.param_info.lock();
            encap::response_get_param_m3(&param, request, request.cseq())
        };
        let sent = self.net.send_rtsp_data(&response).await;
        if !sent {
            log::error!("sending m3 response failed");
        }
        sent
    }

    async fn process_set_param_request(&self, request: &RtspMessage) -> bool {
        if let Some(trigger) = request.header("trigger") {
            let trigger = trigger.to_string();
            self.process_get_trigger(request, &trigger).await;
            return true;
        }
        if let Some(method) = request.header("his_trigger_method") {
            let method = method.to_string();
            self.process_trigger_method(request, &method).await;
            return true;
        }
        self.process_set_param_request_m4(request).await
    }

    async fn process_get_trigger(&self, request: &RtspMessage, notify_trigger: &str) {
        log::debug!("received trigger {notify_trigger}");
        self.send_common_response(request).await;

        if let Some(trigger) = parse_int(notify_trigger) {
            if let Some(listener) = self.listener() {
                listener.notify_trigger(trigger);
            }
        }
    }

    async fn process_trigger_method(&self, request: &RtspMessage, trigger_method: &str) {
        log::debug!("received trigger method {trigger_method}");
        self.send_common_response(request).await;

        match ActionType::from_str(trigger_method) {
            Some(ActionType::Setup) => {
                if self.negotiated.lock().projection_mode == ProjectionMode::Stream {
                    log::info!("setup trigger in stream mode");
                    self.net.cfg_neg_timeout(true);
                    if let Some(listener) = self.listener() {
                        listener
                            .process_stream_mode(&self.negotiated_param_info(), &self.device_id());
                    }
                    return;
                }
                let mut port = 0;
                if self.param_info.lock().vtp != VtpType::NotSupportVideo {
                    if let Some(listener) = self.listener() {
                        port = listener.start_media_vtp(&self.negotiated_param_info());
                    }
                }
                let setup = encap::setup_request(self.next_seq(), "", port);
                self.net.send_rtsp_data(&setup).await;
                self.set_wait(WaitResponse::SetupM6);
            }
            Some(ActionType::Play) => {
                if let Some(listener) = self.listener() {
                    listener.on_play(&self.negotiated_param_info(), 0, &self.device_id());
                }
            }
            Some(ActionType::Pause) => {
                if let Some(listener) = self.listener() {
                    listener.on_pause();
                }
            }
            Some(ActionType::Teardown) => {
                if let Some(listener) = self.listener() {
                    listener.on_tear_down();
                }
            }
            Some(ActionType::SendEventChange) => {
                self.process_event_change_request(request);
            }
            _ => log::error!("unknown trigger method {trigger_method}"),
        }
    }

    fn process_event_change_request(&self, request: &RtspMessage) {
        let module_id = request
            .header("module_id")
            .and_then(parse_int)
            .unwrap_or(INVALID_VALUE);
        let event = request
            .header("event")
            .and_then(parse_int)
            .unwrap_or(INVALID_VALUE);
        let param = request.header("param").unwrap_or_default();

        log::debug!("event change module {module_id} event {event}");
        if module_id != INVALID_VALUE && event != INVALID_VALUE {
            if let Some(listener) = self.listener() {
                listener.notify_event_change(module_id, event, param);
            }
        }
    }

    fn process_get_port(&self, request: &RtspMessage) -> i32 {
        // "Transport: RTP/AVP/UDP;unicast;client_port=xxx"
        let Some(transport) = request.header("transport") else {
            log::debug!("no transport header");
            return INVALID_VALUE;
        };
        let port = get_target_str(transport, "client_port=", "");
        if port.is_empty() {
            log::debug!("no client port in transport header");
            return INVALID_VALUE;
        }
        parse_int(&port).unwrap_or(INVALID_VALUE)
    }

    // ---- response dispatch --------------------------------------------

    pub(crate) async fn on_response(&self, response: RtspMessage) -> bool {
        let ka_cseq = self.keep_alive_cseq.load(Ordering::SeqCst);
        if ka_cseq > 0 && response.cseq() == ka_cseq {
            log::debug!("keep alive response");
            self.set_wait(WaitResponse::None);
            return response.status_code() == STATUS_OK;
        }

        let slot = self.wait_rsp();
        let ok = match slot {
            WaitResponse::OptM1 | WaitResponse::OptM2 => self.process_common_response(&response),
            WaitResponse::GetParamM3 => self.process_get_param_m3_response(&response),
            WaitResponse::SetParamM4 => self.process_set_param_m4_response(&response).await,
            WaitResponse::SetParamM5 => self.process_set_param_m5_response(&response),
            WaitResponse::SetupM6 => self.process_setup_m6_response(&response),
            WaitResponse::PlayM7 => self.process_play_m7_response(&response),
            WaitResponse::TeardownM8 => self.process_teardown_m8_response(&response),
            WaitResponse::PauseM9 => self.process_pause_m9_response(&response),
            WaitResponse::KeepAlive => {
                self.set_wait(WaitResponse::None);
                true
            }
            WaitResponse::Announce => self.deal_announce_response(&response).await,
            WaitResponse::None => {
                log::warn!("response in unexpected slot {slot:?}");
                true
            }
        };

        if !ok {
            log::error!("response handling failed in slot {slot:?}");
            self.report_error();
        }
        ok
    }

    fn process_common_response(&self, response: &RtspMessage) -> bool {
        if response.status_code() != STATUS_OK {
            log::error!("response status is {}", response.status_code());
            return false;
        }
        true
    }

    /// Response to our ANNOUNCE: arm the codec and open with OPTIONS (M1).
    async fn deal_announce_response(&self, _response: &RtspMessage) -> bool {
        if self.end_type != EndType::Source {
            return true;
        }

        let alg_id = self.negotiated.lock().encryption.control_channel_alg;
        self.net.set_neg_algorithm_id(alg_id);

        self.send_option_m1m2().await;
        self.set_wait(WaitResponse::OptM1);
        true
    }

    fn process_get_param_m3_response(&self, response: &RtspMessage) -> bool {
        log::debug!("processing m3 response");
        if response.status_code() != STATUS_OK || response.header("his_version").is_none() {
            log::error!(
                "bad m3 response, status {} or missing his_version",
                response.status_code()
            );
            return false;
        }
        if let Some(version) = response.header("his_version").and_then(parse_double) {
            self.negotiated.lock().version = version;
        }

        // device type first, for forward compatibility
        self.process_sink_device_type(response.header("his_device_type").unwrap_or_default());

        let Some(video) = response.header("his_video_formats") else {
            log::error!("sink did not provide his_video_formats");
            return false;
        };
        self.process_video_info(video);

        self.process_audio_info(response);
        self.process_feature_set(response.header("his_feature").unwrap_or_default());

        match response.header("his_uibc_capability") {
            None | Some("") => {
                log::error!("sink does not support uibc");
                self.negotiated.lock().remote_control = RemoteControlParamInfo::default();
            }
            Some(content) => self.process_uibc(content),
        }

        self.process_sink_vtp(response.header("his_vtp").unwrap_or_default());
        self.process_module_custom_params(
            response.header("his_media_capability").unwrap_or_default(),
            response
                .header("his_player_controller_capability")
                .unwrap_or_default(),
        );
        true
    }

    async fn process_set_param_m4_response(&self, response: &RtspMessage) -> bool {
        log::debug!("processing m4 response");
        if response.status_code() != STATUS_OK {
            log::error!("m4 response status is {}", response.status_code());
            return false;
        }
        let ok = self.send_action(ActionType::Setup).await;
        self.set_wait(WaitResponse::SetParamM5);
        ok
    }

    fn process_set_param_m5_response(&self, response: &RtspMessage) -> bool {
        log::debug!("processing m5 response");
        self.set_wait(WaitResponse::None);
        if response.status_code() != STATUS_OK {
            log::error!("m5 response status is {}", response.status_code());
            return false;
        }
        true
    }

    fn process_setup_m6_response(&self, response: &RtspMessage) -> bool {
        log::debug!("processing setup m6 response");
        if response.status_code() != STATUS_OK {
            return false;
        }

        let Some(transport) = response.header("transport") else {
            log::debug!("setup response without transport header");
            return false;
        };

        let server_port = get_target_str(transport, "server_port=", COMMON_SEPARATOR);
        if server_port.is_empty() {
            log::debug!("setup response without server port");
            return false;
        }
        let server_port = parse_int(&server_port).unwrap_or(INVALID_VALUE);

        let remotectl_port = get_target_str(transport, "remotectl_port=", COMMON_SEPARATOR);
        if remotectl_port.is_empty() {
            log::error!("setup response without remote control port");
            return false;
        }
        let remotectl_port = parse_int(&remotectl_port).unwrap_or(INVALID_VALUE);

        log::debug!("media port {server_port}, remote control port {remotectl_port}");
        self.net.cfg_neg_timeout(true);
        if let Some(listener) = self.listener() {
            listener.on_setup(
                &self.negotiated_param_info(),
                server_port,
                remotectl_port,
                &self.device_id(),
            );
        }
        true
    }

    fn process_play_m7_response(&self, response: &RtspMessage) -> bool {
        log::debug!("play response, status {}", response.status_code());
        self.set_wait(WaitResponse::None);
        true
    }

    fn process_teardown_m8_response(&self, response: &RtspMessage) -> bool {
        log::debug!("teardown response, status {}", response.status_code());
        if let Some(listener) = self.listener() {
            listener.on_tear_down();
        }
        true
    }

    fn process_pause_m9_response(&self, response: &RtspMessage) -> bool {
        log::debug!("pause response, status {}", response.status_code());
        if let Some(listener) = self.listener() {
            listener.on_pause();
        }
        true
    }

    // ---- negotiation --------------------------------------------------

    fn process_sink_bitrate(&self, content: &str, video: &mut rtsp_types::VideoProperty) {
        let bitrate = parse_int(&get_target_str(content, "bitrate", COMMON_SEPARATOR)).unwrap_or(0);
        let min_bitrate =
            parse_int(&get_target_str(content, "vbr-min", COMMON_SEPARATOR)).unwrap_or(0);
        let max_bitrate =
            parse_int(&get_target_str(content, "vbr-max", COMMON_SEPARATOR)).unwrap_or(0);

        if (VIDEO_BITRATE_MIN..=VIDEO_BITRATE_MAX).contains(&bitrate) {
            if min_bitrate >= VIDEO_BITRATE_MIN
                && max_bitrate <= VIDEO_BITRATE_MAX
                && bitrate >= min_bitrate
                && bitrate <= max_bitrate
            {
                video.min_bitrate = min_bitrate;
                video.max_bitrate = max_bitrate;
            } else if min_bitrate == 0 && max_bitrate == 0 {
                log::debug!("peer vbr range not set, keeping defaults");
            } else {
                log::debug!("illegal peer bitrate {bitrate} range {min_bitrate}-{max_bitrate}");
                return;
            }
            video.bitrate = bitrate;
            return;
        }

        if min_bitrate >= VIDEO_BITRATE_MIN
            && max_bitrate <= VIDEO_BITRATE_MAX
            && min_bitrate <= max_bitrate
        {
            video.bitrate = ((min_bitrate as f64 + max_bitrate as f64) / 2.0).round() as i32;
            video.min_bitrate = min_bitrate;
            video.max_bitrate = max_bitrate;
        }
    }

    fn process_video_info(&self, content: &str) {
        let local_codec = self.param_info.lock().video.codec_type;
        let mut negotiated = self.negotiated.lock();
        let mut video = negotiated.video.clone();

        let height = parse_uint32(&get_target_str(content, "height", "")).unwrap_or(0);
        let width = parse_uint32(&get_target_str(content, "width", COMMON_SEPARATOR)).unwrap_or(0);
        if height > 0 && width > 0 {
            video.video_height = height;
            video.video_width = width;
        }

        let codecs = parse_int(&get_target_str(content, "codecs", COMMON_SEPARATOR)).unwrap_or(0);
        if codecs > 0 {
            video.codec_type = local_codec.min(codecs);
        }

        if let Some(fps) = parse_int(&get_target_str(content, "fps", COMMON_SEPARATOR)) {
            if (VIDEO_FPS_MIN..=VIDEO_FPS_MAX).contains(&fps) {
                video.fps = fps;
            }
        }
        if let Some(gop) = parse_int(&get_target_str(content, "gop", COMMON_SEPARATOR)) {
            if gop == VIDEO_GOP_IPPP || (VIDEO_GOP_MIN..=VIDEO_GOP_MAX).contains(&gop) {
                video.gop = gop;
            }
        }
        if let Some(dpi) = parse_uint32(&get_target_str(content, "dpi", COMMON_SEPARATOR)) {
            video.dpi = dpi;
        }

        let scr_w = parse_uint32(&get_target_str(content, "scr-w", COMMON_SEPARATOR)).unwrap_or(0);
        let scr_h = parse_uint32(&get_target_str(content, "scr-h", COMMON_SEPARATOR)).unwrap_or(0);
        if scr_w > 0 && scr_h > 0 {
            video.screen_width = scr_w;
            video.screen_height = scr_h;
        }

        if let Some(color) =
            parse_int(&get_target_str(content, "color-standard", COMMON_SEPARATOR))
        {
            if color > 0 {
                video.color_standard = color;
            }
        }

        self.process_sink_bitrate(content, &mut video);
        negotiated.video = video;
    }

    fn process_audio_info(&self, msg: &RtspMessage) {
        let mut audio = self.negotiated.lock().audio.clone();

        if let Some(content) = msg.header("his_audio_codecs") {
            if !content.is_empty() {
                audio.codec = parse_uint32(content).unwrap_or(audio.codec);
            }
        }
        if let Some(content) = msg.header("his_audio_formats") {
            if !content.is_empty() {
                if let Some(rate) =
                    parse_uint32(&get_target_str(content, "sample-rate", COMMON_SEPARATOR))
                {
                    audio.sample_rate = rate;
                }
                if let Some(width) =
                    parse_int(&get_target_str(content, "sample-bit-width", COMMON_SEPARATOR))
                {
                    audio.sample_bit_width = width as u8;
                }
                if let Some(channels) =
                    parse_uint32(&get_target_str(content, "channel-config", COMMON_SEPARATOR))
                {
                    audio.channel_config = channels;
                }
                if let Some(bitrate) =
                    parse_uint32(&get_target_str(content, "bitrate", COMMON_SEPARATOR))
                {
                    audio.bitrate = bitrate;
                }
            }
        }

        self.negotiated.lock().audio = audio;
    }

    fn process_sink_device_type(&self, content: &str) {
        let local = self.param_info.lock().device_type;
        let mut info = DeviceTypeParamInfo {
            local_device_type: local.local_device_type,
            local_device_subtype: local.local_device_subtype,
            ..Default::default()
        };

        if content.is_empty() {
            info.remote_device_type = local.remote_device_type;
            info.remote_device_subtype = SubDeviceType::Default;
            log::debug!("sink device type not carried, keeping requested values");
        } else {
            let device_type =
                parse_int(&get_target_str(content, "device_type", COMMON_SEPARATOR)).unwrap_or(0);
            if device_type > 0 {
                info.remote_device_type = DeviceType::from_i32(device_type);
            }
            let subtype =
                parse_int(&get_target_str(content, "subtype", COMMON_SEPARATOR)).unwrap_or(0);
            if subtype > 0 {
                info.remote_device_subtype = SubDeviceType::from_i32(subtype);
            }
        }
        self.negotiated.lock().device_type = info;
    }

    /// Source messages carry both sides of the device type; remote and
    /// local are mirrored relative to [`Self::process_sink_device_type`].
    fn process_source_device_type(&self, content: &str) {
        let local = self.param_info.lock().device_type;
        let mut info = DeviceTypeParamInfo {
            local_device_type: local.local_device_type,
            local_device_subtype: local.local_device_subtype,
            ..Default::default()
        };

        if content.is_empty() {
            info.remote_device_type = local.remote_device_type;
            info.remote_device_subtype = SubDeviceType::Default;
        } else {
            let source_type =
                parse_int(&get_target_str(content, "source_device_type", COMMON_SEPARATOR))
                    .unwrap_or(0);
            if source_type > 0 {
                info.remote_device_type = DeviceType::from_i32(source_type);
            }
            let source_subtype =
                parse_int(&get_target_str(content, "source_subtype", COMMON_SEPARATOR))
                    .unwrap_or(0);
            if source_subtype > 0 {
                info.remote_device_subtype = SubDeviceType::from_i32(source_subtype);
            }
            let sink_type =
                parse_int(&get_target_str(content, "device_type", COMMON_SEPARATOR)).unwrap_or(0);
            if sink_type > 0 {
                info.local_device_type = DeviceType::from_i32(sink_type);
            }
            let sink_subtype =
                parse_int(&get_target_str(content, "subtype", COMMON_SEPARATOR)).unwrap_or(0);
            if sink_subtype > 0 {
                info.local_device_subtype = SubDeviceType::from_i32(sink_subtype);
            }
        }
        self.negotiated.lock().device_type = info;
    }

    fn process_feature_set(&self, content: &str) {
        let local = self.param_info.lock().feature_set.clone();
        if content.is_empty() || local.is_empty() {
            log::debug!("local or peer feature set is empty");
            self.negotiated.lock().feature_set = BTreeSet::new();
            return;
        }

        let list = get_target_str(content, "input_feature_set=", COMMON_SEPARATOR);
        if list.is_empty() {
            log::error!("no input_feature_set in '{content}'");
            self.negotiated.lock().feature_set = BTreeSet::new();
            return;
        }

        let peer: BTreeSet<i32> = list
            .split(", ")
            .filter(|item| !item.is_empty())
            .map(|item| parse_int(item).unwrap_or(INVALID_VALUE))
            .collect();
        self.negotiated.lock().feature_set = local.intersection(&peer).copied().collect();
    }

    fn process_sink_vtp(&self, content: &str) {
        if content.is_empty() {
            log::info!("peer does not support vtp");
            self.negotiated.lock().vtp = VtpType::NotSupportVideo;
            return;
        }
        let token = content.to_ascii_lowercase();
        if token == "supportav" || token == "supported" || token == "support_power_saving" {
            // vtp stays disabled even when the peer supports it
            log::warn!("peer supports vtp ({token}), coercing to not-supported");
            self.negotiated.lock().vtp = VtpType::NotSupportVideo;
        } else {
            log::info!("peer carries invalid vtp flag {content}");
            self.negotiated.lock().vtp = VtpType::NotSupportVideo;
        }
    }

    fn process_projection_mode(&self, content: &str) {
        if content.is_empty() {
            log::error!("projection mode is empty, keeping default");
            return;
        }
        let mode = get_target_str(content, "projection_mode", COMMON_SEPARATOR).to_ascii_lowercase();
        match mode.as_str() {
            "mirror" => self.negotiated.lock().projection_mode = ProjectionMode::Mirror,
            "media_resource" => self.negotiated.lock().projection_mode = ProjectionMode::Stream,
            _ => {}
        }
        log::info!("projection mode {mode}");
    }

    fn pre_process_uibc(&self, content: &str) -> Option<String> {
        if !self.param_info.lock().remote_control.support_uibc {
            log::error!("local side does not support uibc");
            return None;
        }
        let categories = get_target_str(content, "input_category_list=", COMMON_SEPARATOR);
        if categories.is_empty() {
            log::error!("no input_category_list");
            return None;
        }
        if !categories.contains("HIDC") && !categories.contains("GENERIC") {
            log::error!("input_category_list has neither HIDC nor GENERIC");
            return None;
        }
        Some(categories)
    }

    fn process_uibc(&self, content: &str) {
        let Some(categories) = self.pre_process_uibc(content) else {
            self.negotiated.lock().remote_control = RemoteControlParamInfo::default();
            return;
        };

        let local = self.param_info.lock().remote_control.clone();
        let mut rc = RemoteControlParamInfo {
            support_uibc: true,
            ..Default::default()
        };

        if categories.contains("GENERIC") && local.support_generic {
            let list = get_target_str(content, "generic_cap_list=", COMMON_SEPARATOR);
            if list.is_empty() {
                log::error!("no generic_cap_list");
                return;
            }
            if local.generic_list.is_empty() {
                log::error!("local generic list is empty");
                return;
            }
            rc.generic_list = list.split(", ").map(str::to_string).collect();
            rc.support_generic = true;
        }

        if categories.contains("HIDC") && local.support_hidc {
            let list = get_target_str(content, "hidc_cap_list=", COMMON_SEPARATOR);
            if list.is_empty() {
                log::error!("no hidc_cap_list");
                return;
            }
            if local.hidc_list.is_empty() {
                log::error!("local hidc list is empty");
                return;
            }
            rc.hidc_list = list.split(", ").map(str::to_string).collect();
            rc.support_hidc = true;
        }

        if local.support_vendor {
            let list = get_target_str(content, "vendor_cap_list=", COMMON_SEPARATOR);
            if list.is_empty() {
                log::error!("no vendor_cap_list");
                return;
            }
            if local.vendor_list.is_empty() {
                log::error!("local vendor list is empty");
                return;
            }
            rc.vendor_list = list.split(", ").map(str::to_string).collect();
            rc.support_vendor = true;
        }

        self.negotiated.lock().remote_control = rc;
    }

    fn process_module_custom_params(&self, media_params: &str, controller_params: &str) {
        let controller_params = controller_params
            .split_once(COMMON_SEPARATOR)
            .map(|(head, _)| head)
            .unwrap_or(controller_params);

        if let Some(listener) = self.listener() {
            listener.notify_module_custom_params_negotiation(media_params, controller_params);
        }
    }

    /// M4 request processing on the receiving side.
    async fn process_set_param_request_m4(&self, request: &RtspMessage) -> bool {
        log::debug!("processing set parameter m4 as {:?}", self.end_type);

        if let Some(version) = request.header("his_version").and_then(parse_double) {
            self.negotiated.lock().version = version;
        }
        if let Some(content) = request.header("his_device_type") {
            let content = content.to_string();
            self.process_source_device_type(&content);
        }
        if let Some(content) = request.header("his_video_formats") {
            let content = content.to_string();
            self.process_video_info(&content);
        }

        self.process_audio_info(request);

        if let Some(content) = request.header("his_feature") {
            let content = content.to_string();
            self.process_feature_set(&content);
        }
        self.process_sink_vtp(request.header("his_vtp").unwrap_or_default());
        if let Some(content) = request.header("his_extended_field") {
            let content = content.to_string();
            self.process_projection_mode(&content);
        }

        match request.header("his_uibc_capability") {
            Some(content) if !content.is_empty() => {
                let content = content.to_string();
                self.process_uibc(&content);
            }
            _ => {
                log::error!("peer does not support uibc");
                self.negotiated.lock().remote_control = RemoteControlParamInfo::default();
            }
        }

        if let Some(media) = request.header("his_media_capability") {
            let media = media.to_string();
            let controller = request
                .header("his_player_controller_capability")
                .unwrap_or_default()
                .to_string();
            self.process_module_custom_params(&media, &controller);
        } else {
            log::debug!("no media capability carried");
            self.negotiated.lock().media_capability = String::new();
        }

        if self.end_type == EndType::Sink {
            return self.send_common_response(request).await;
        }
        true
    }
}
