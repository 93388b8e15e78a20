//! Session-level policies: the media-ready gate and the stream-sink
//! disconnect behavior.

use castlink_session::{CastSession, SessionEventListener, SessionProperty};
use channel::{Channel, ChannelRequest, DeviceInfo};
use parking_lot::Mutex;
use rtsp_types::{
    EndType, EventId, LinkType, ModuleType, ParamInfo, ProtocolType,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSessionListener {
    events: Mutex<Vec<(EventId, String)>>,
    errors: Mutex<Vec<i32>>,
}

impl SessionEventListener for RecordingSessionListener {
    fn on_event(&self, event: EventId, data: &str) {
        self.events.lock().push((event, data.to_string()));
    }

    fn on_session_error(&self, error_code: i32) {
        self.errors.lock().push(error_code);
    }
}

fn property(end_type: EndType, protocol_type: ProtocolType) -> SessionProperty {
    SessionProperty {
        end_type,
        protocol_type,
        session_id: 3,
        local_device: DeviceInfo::default(),
        remote_device: DeviceInfo {
            device_id: "peer".into(),
            session_id: 3,
            ..Default::default()
        },
        param: ParamInfo::default(),
    }
}

struct DummyChannel {
    request: ChannelRequest,
}

impl DummyChannel {
    fn new(session: &CastSession, module: ModuleType) -> Arc<Self> {
        Arc::new(Self {
            request: session.channel_request(module, LinkType::SoftBus),
        })
    }
}

#[async_trait::async_trait]
impl Channel for DummyChannel {
    fn request(&self) -> &ChannelRequest {
        &self.request
    }

    async fn send(&self, _data: &[u8]) -> bool {
        true
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn media_gate_needs_both_channels_for_stream() {
    let listener = Arc::new(RecordingSessionListener::default());
    let session = CastSession::new(
        property(EndType::Sink, ProtocolType::Stream),
        Arc::downgrade(&listener) as _,
    );

    assert!(!session.is_media_channel_ready());
    session.set_media_channel(ModuleType::Video);
    assert!(!session.is_media_channel_ready());
    session.set_media_channel(ModuleType::Audio);
    assert!(session.is_media_channel_ready());

    session.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn media_gate_needs_only_video_otherwise() {
    let listener = Arc::new(RecordingSessionListener::default());
    let session = CastSession::new(
        property(EndType::Sink, ProtocolType::SuperLauncher),
        Arc::downgrade(&listener) as _,
    );

    session.set_media_channel(ModuleType::Video);
    assert!(session.is_media_channel_ready());

    session.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_sink_survives_channel_removal() {
    use channel::ChannelManagerListener;

    let listener = Arc::new(RecordingSessionListener::default());
    let session = CastSession::new(
        property(EndType::Sink, ProtocolType::Stream),
        Arc::downgrade(&listener) as _,
    );

    let channel = DummyChannel::new(&session, ModuleType::Stream);
    session
        .channel_manager_listener()
        .on_channel_removed(channel as _);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = listener.events.lock().clone();
    assert!(events
        .iter()
        .any(|(event, _)| *event == EventId::StreamDeviceDisconnected));
    assert!(
        listener.errors.lock().is_empty(),
        "the sink keeps playing, no teardown"
    );

    session.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_session_tears_down_on_channel_removal() {
    use channel::ChannelManagerListener;

    let listener = Arc::new(RecordingSessionListener::default());
    let session = CastSession::new(
        property(EndType::Source, ProtocolType::Mirror),
        Arc::downgrade(&listener) as _,
    );

    let channel = DummyChannel::new(&session, ModuleType::Rtsp);
    session
        .channel_manager_listener()
        .on_channel_removed(channel as _);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!listener.errors.lock().is_empty());

    session.stop().await;
}
