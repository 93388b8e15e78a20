//! Handshake scenarios driven against a recording channel.

use channel::{Channel, ChannelRequest, DeviceInfo};
use parking_lot::Mutex;
use castlink_rtsp::{RtspController, RtspListener};
use rtsp_types::{
    EndType, LinkType, ModuleType, ParamInfo, ProjectionMode, ProtocolType, WaitResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct RecordingChannel {
    request: ChannelRequest,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new(link_type: LinkType) -> Arc<Self> {
        Arc::new(Self {
            request: ChannelRequest {
                module_type: ModuleType::Rtsp,
                link_type,
                end_type: EndType::Source,
                protocol_type: ProtocolType::Stream,
                connection_id: 1,
                local_device: DeviceInfo::default(),
                remote_device: DeviceInfo {
                    device_id: "peer".into(),
                    ..Default::default()
                },
                local_port: -1,
                remote_port: -1,
                is_receiver: true,
            },
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl Channel for RecordingChannel {
    fn request(&self) -> &ChannelRequest {
        &self.request
    }

    async fn send(&self, data: &[u8]) -> bool {
        self.sent
            .lock()
            .push(String::from_utf8_lossy(data).into_owned());
        true
    }
}

#[derive(Default)]
struct CountingListener {
    setups: AtomicUsize,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    teardowns: AtomicUsize,
    errors: AtomicUsize,
    peer_gone: AtomicUsize,
    stream_modes: AtomicUsize,
    custom_params: AtomicUsize,
}

impl RtspListener for CountingListener {
    fn on_setup(&self, _param: &ParamInfo, _media: i32, _remote: i32, _device_id: &str) {
        self.setups.fetch_add(1, Ordering::SeqCst);
    }

    fn on_play(&self, _param: &ParamInfo, _port: i32, _device_id: &str) -> bool {
        self.plays.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_pause(&self) -> bool {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_tear_down(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error_code: i32) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_peer_gone(&self) {
        self.peer_gone.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_trigger(&self, _trigger: i32) {}

    fn notify_event_change(&self, _module_id: i32, _event: i32, _param: &str) {}

    fn notify_module_custom_params_negotiation(&self, _media: &str, _controller: &str) {
        self.custom_params.fetch_add(1, Ordering::SeqCst);
    }

    fn process_stream_mode(&self, _param: &ParamInfo, _device_id: &str) {
        self.stream_modes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_player_ready(&self, _param: &ParamInfo, _device_id: &str, _ready_flag: i32) -> bool {
        true
    }
}

fn feed(controller: &RtspController, text: &str) {
    use channel::ChannelListener;
    controller.channel_listener().on_data_received(text.as_bytes());
}

async fn settle() {
    // let the dispatch worker drain
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn make_source(
    listener: &Arc<CountingListener>,
    link: LinkType,
) -> (Arc<RtspController>, Arc<RecordingChannel>) {
    let controller = RtspController::new(
        Arc::downgrade(listener) as _,
        ProtocolType::Stream,
        EndType::Source,
    );
    let channel = RecordingChannel::new(link);
    (controller, channel)
}

#[tokio::test(start_paused = true)]
async fn source_advances_to_get_param_after_options() {
    let listener = Arc::new(CountingListener::default());
    let (controller, channel) = make_source(&listener, LinkType::SoftBus);

    controller.start(&ParamInfo::default(), &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    settle().await;

    // sink drives on the bus: OPTIONS (M1) arrives
    feed(
        &controller,
        "OPTIONS * RTSP/1.0\r\nDate: 2024-01-01\r\nCseq: 1\r\n\r\nRequire: com.huawei.hisight1.0\r\n\r\n",
    );
    settle().await;

    let sent = channel.sent();
    assert!(
        sent.iter().any(|m| m.contains("200 OK") && m.contains("Public:")),
        "options response missing: {sent:?}"
    );
    assert!(
        sent.iter().any(|m| m.starts_with("GET_PARAMETER")),
        "m3 request missing: {sent:?}"
    );
    assert_eq!(controller.wait_rsp(), WaitResponse::GetParamM3);
}

#[tokio::test(start_paused = true)]
async fn m3_response_negotiates_parameters() {
    let listener = Arc::new(CountingListener::default());
    let (controller, channel) = make_source(&listener, LinkType::SoftBus);

    let mut local = ParamInfo::default();
    local.video.codec_type = 2;
    local.video.fps = 60;
    local.video.bitrate = 10_000_000;
    local.feature_set = [1, 2, 3].into_iter().collect();

    controller.start(&local, &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    feed(
        &controller,
        "OPTIONS * RTSP/1.0\r\nCseq: 1\r\n\r\n",
    );
    settle().await;
    assert_eq!(controller.wait_rsp(), WaitResponse::GetParamM3);

    feed(
        &controller,
        "RTSP/1.0 200 OK\r\nCseq: 2\r\n\
         his_version: 1.05\r\n\
         his_video_formats: codecs 1;fps 30;gop -1;bitrate 8000000;vbr-min 500000;vbr-max 20000000;dpi 320;scr-w 2244;scr-h 1080;width 1920;height 1080\r\n\
         his_audio_formats: sample-rate 48000;sample-bit-width 16;channel-config 2;bitrate 96000\r\n\
         his_feature: input_feature_set=2, 3, 4;\r\n\r\n",
    );
    settle().await;

    let negotiated = controller.negotiated_param_info();
    // codec id intersects by minimum
    assert_eq!(negotiated.video.codec_type, 1);
    assert_eq!(negotiated.video.fps, 30);
    assert_eq!(negotiated.video.gop, -1);
    // peer bitrate falls inside its range, both are adopted
    assert_eq!(negotiated.video.bitrate, 8_000_000);
    assert_eq!(negotiated.video.min_bitrate, 500_000);
    assert_eq!(negotiated.video.max_bitrate, 20_000_000);
    assert_eq!(negotiated.video.video_width, 1920);
    assert_eq!(negotiated.video.video_height, 1080);
    assert_eq!(negotiated.video.screen_width, 2244);
    // audio is adopted verbatim
    assert_eq!(negotiated.audio.sample_rate, 48_000);
    assert_eq!(negotiated.audio.sample_bit_width, 16);
    assert_eq!(negotiated.audio.channel_config, 2);
    assert_eq!(negotiated.audio.bitrate, 96_000);
    // feature sets intersect
    let features: Vec<i32> = negotiated.feature_set.into_iter().collect();
    assert_eq!(features, vec![2, 3]);
    // module custom params negotiation was surfaced
    assert_eq!(listener.custom_params.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_fps_is_ignored() {
    let listener = Arc::new(CountingListener::default());
    let (controller, channel) = make_source(&listener, LinkType::SoftBus);

    let mut local = ParamInfo::default();
    local.video.fps = 60;
    controller.start(&local, &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    feed(&controller, "OPTIONS * RTSP/1.0\r\nCseq: 1\r\n\r\n");
    settle().await;

    feed(
        &controller,
        "RTSP/1.0 200 OK\r\nCseq: 2\r\n\
         his_version: 1.0\r\n\
         his_video_formats: codecs 0;fps 144;gop 10000;vbr-min 500000;vbr-max 1500000\r\n\r\n",
    );
    settle().await;

    let negotiated = controller.negotiated_param_info();
    assert_eq!(negotiated.video.fps, 60);
    assert_eq!(negotiated.video.gop, 0);
    // no bitrate from the peer: the middle of the valid range is adopted
    assert_eq!(negotiated.video.bitrate, 1_000_000);
}

#[tokio::test(start_paused = true)]
async fn setup_trigger_in_stream_mode_does_not_send_setup() {
    let listener = Arc::new(CountingListener::default());
    let controller = RtspController::new(
        Arc::downgrade(&listener) as _,
        ProtocolType::Stream,
        EndType::Sink,
    );
    let channel = RecordingChannel::new(LinkType::SoftBus);

    let mut param = ParamInfo::default();
    param.projection_mode = ProjectionMode::Stream;
    controller.start(&param, &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    settle().await;
    channel.sent.lock().clear();

    feed(
        &controller,
        "SET_PARAMETER rtsp://localhost/hisight1.0 RTSP/1.0\r\nCseq: 5\r\nhis_trigger_method: SETUP\r\n\r\n",
    );
    settle().await;

    assert_eq!(listener.stream_modes.load(Ordering::SeqCst), 1);
    let sent = channel.sent();
    assert!(
        sent.iter().any(|m| m.contains("200 OK")),
        "trigger must be acknowledged: {sent:?}"
    );
    assert!(
        !sent.iter().any(|m| m.starts_with("SETUP")),
        "no SETUP request may be sent in stream mode: {sent:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn play_pause_teardown_triggers_invoke_callbacks() {
    let listener = Arc::new(CountingListener::default());
    let controller = RtspController::new(
        Arc::downgrade(&listener) as _,
        ProtocolType::Mirror,
        EndType::Sink,
    );
    let channel = RecordingChannel::new(LinkType::SoftBus);
    controller.start(&ParamInfo::default(), &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    settle().await;

    for method in ["PLAY", "PAUSE", "TEARDOWN"] {
        feed(
            &controller,
            &format!(
                "SET_PARAMETER rtsp://localhost/hisight1.0 RTSP/1.0\r\nCseq: 6\r\nhis_trigger_method: {method}\r\n\r\n"
            ),
        );
    }
    settle().await;

    assert_eq!(listener.plays.load(Ordering::SeqCst), 1);
    assert_eq!(listener.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(listener.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_method_is_answered_with_405() {
    let listener = Arc::new(CountingListener::default());
    let (controller, channel) = make_source(&listener, LinkType::SoftBus);
    controller.start(&ParamInfo::default(), &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    settle().await;

    feed(&controller, "DESCRIBE * RTSP/1.0\r\nCseq: 9\r\n\r\n");
    settle().await;

    let sent = channel.sent();
    assert!(
        sent.iter().any(|m| m.contains("405 Method Not Allowed")),
        "missing 405: {sent:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn negotiation_watchdog_fires_once() {
    let listener = Arc::new(CountingListener::default());
    let (controller, channel) = make_source(&listener, LinkType::SoftBus);

    controller.start(&ParamInfo::default(), &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(listener.peer_gone.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(listener.peer_gone.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cseq_strictly_increases() {
    let listener = Arc::new(CountingListener::default());
    let controller = RtspController::new(
        Arc::downgrade(&listener) as _,
        ProtocolType::Mirror,
        EndType::Sink,
    );
    let channel = RecordingChannel::new(LinkType::SoftBus);
    controller.start(&ParamInfo::default(), &[0u8; 16]);
    controller.add_channel(channel.clone() as _, "peer").await;
    settle().await;

    for _ in 0..3 {
        controller.send_event_change(1, 2, "p").await;
    }

    let mut seqs = Vec::new();
    for msg in channel.sent() {
        let parsed = rtsp_types::RtspMessage::parse(&msg);
        if parsed.header("his_trigger_method") == Some("SEND_EVENT_CHANGE") {
            seqs.push(parsed.cseq());
        }
    }
    assert_eq!(seqs.len(), 3);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "cseq not increasing: {seqs:?}");
}
