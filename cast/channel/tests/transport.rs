//! Transport-level behavior over real sockets and a fake bus.

use castlink_channel::bus::{BusBackend, BusEvent, BusPayloadKind, BusRegistry};
use castlink_channel::{
    Channel, ChannelError, ChannelListener, ChannelManager, ChannelManagerListener, ChannelRequest,
    DeviceInfo,
};
use parking_lot::Mutex;
use rtsp_types::{DeviceType, EndType, LinkType, ModuleType, ProtocolType};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;

#[derive(Default)]
struct RecordingManagerListener {
    created: Mutex<Vec<(ModuleType, Arc<dyn Channel>)>>,
    removed: Mutex<Vec<ModuleType>>,
    failed: Mutex<Vec<ModuleType>>,
}

impl ChannelManagerListener for RecordingManagerListener {
    fn on_channel_created(&self, channel: Arc<dyn Channel>) {
        let module = channel.request().module_type;
        self.created.lock().push((module, channel));
    }

    fn on_channel_open_failed(&self, request: &ChannelRequest, _error_code: i32) {
        self.failed.lock().push(request.module_type);
    }

    fn on_channel_error(&self, _channel: Arc<dyn Channel>, _error_code: i32) {}

    fn on_channel_removed(&self, channel: Arc<dyn Channel>) {
        self.removed.lock().push(channel.request().module_type);
    }

    fn set_media_channel(&self, _module: ModuleType) {}

    fn is_media_channel_ready(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct RecordingDataListener {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl ChannelListener for RecordingDataListener {
    fn on_data_received(&self, data: &[u8]) {
        self.frames.lock().push(data.to_vec());
    }
}

fn request(
    module: ModuleType,
    link: LinkType,
    end: EndType,
    remote_ip: &str,
    remote_port: i32,
) -> ChannelRequest {
    ChannelRequest {
        module_type: module,
        link_type: link,
        end_type: end,
        protocol_type: ProtocolType::Mirror,
        connection_id: 0,
        local_device: DeviceInfo {
            ip_address: "127.0.0.1".into(),
            ..Default::default()
        },
        remote_device: DeviceInfo {
            device_id: "peer-device".into(),
            network_id: "peer-network".into(),
            ip_address: remote_ip.into(),
            device_type: DeviceType::Default,
            session_id: 5,
        },
        local_port: -1,
        remote_port,
        is_receiver: true,
    }
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_frames_round_trip_between_roles() {
    let server_listener = Arc::new(RecordingManagerListener::default());
    let server_manager = ChannelManager::new(1, Arc::downgrade(&server_listener) as _);
    let server_data = Arc::new(RecordingDataListener::default());

    // source + tcp listens per the role table
    let port = server_manager
        .create_channel(
            request(ModuleType::Rtsp, LinkType::Tcp, EndType::Source, "127.0.0.1", -1),
            server_data.clone(),
        )
        .await
        .unwrap();
    assert!(port > 0);

    let client_listener = Arc::new(RecordingManagerListener::default());
    let client_manager = ChannelManager::new(2, Arc::downgrade(&client_listener) as _);
    let client_data = Arc::new(RecordingDataListener::default());

    // sink + tcp connects
    client_manager
        .create_channel(
            request(ModuleType::Rtsp, LinkType::Tcp, EndType::Sink, "127.0.0.1", port),
            client_data.clone(),
        )
        .await
        .unwrap();

    wait_until(|| !client_listener.created.lock().is_empty()).await;
    wait_until(|| !server_listener.created.lock().is_empty()).await;

    let client_channel = client_listener.created.lock()[0].1.clone();
    assert!(client_channel.send(b"hello cast").await);
    assert!(client_channel.send(&[0u8; 1024]).await);

    wait_until(|| server_data.frames.lock().len() == 2).await;
    let frames = server_data.frames.lock();
    assert_eq!(frames[0], b"hello cast");
    assert_eq!(frames[1].len(), 1024);

    server_manager.destroy_all_channels().await;
    client_manager.destroy_all_channels().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn video_server_accepts_exactly_twice() {
    let listener = Arc::new(RecordingManagerListener::default());
    let manager = ChannelManager::new(1, Arc::downgrade(&listener) as _);
    let data = Arc::new(RecordingDataListener::default());

    // pick the port the video peer will present
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let video_peer_port = probe.local_addr().unwrap().port();
    drop(probe);

    let port = manager
        .create_channel(
            request(
                ModuleType::Video,
                LinkType::Tcp,
                EndType::Source,
                "127.0.0.1",
                i32::from(video_peer_port),
            ),
            data.clone(),
        )
        .await
        .unwrap();

    // first peer presents the expected video port: attributed to video
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_reuseaddr(true).unwrap();
    socket
        .bind(format!("127.0.0.1:{video_peer_port}").parse().unwrap())
        .unwrap();
    let mut video_stream = socket
        .connect(format!("127.0.0.1:{port}").parse().unwrap())
        .await
        .unwrap();

    // second peer from an ephemeral port: wrapped as the audio sibling
    let mut audio_stream = tokio::net::TcpStream::connect(("127.0.0.1", port as u16))
        .await
        .unwrap();

    wait_until(|| listener.created.lock().len() == 2).await;
    {
        let created = listener.created.lock();
        let modules: Vec<ModuleType> = created.iter().map(|(m, _)| *m).collect();
        assert!(modules.contains(&ModuleType::Video));
        assert!(modules.contains(&ModuleType::Audio));
    }

    // a third connect is never accepted
    let _third = tokio::net::TcpStream::connect(("127.0.0.1", port as u16)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(listener.created.lock().len(), 2);

    // both accepted sockets feed their own framed read loop
    video_stream
        .write_all(&[&4u32.to_be_bytes()[..], b"vvvv"].concat())
        .await
        .unwrap();
    audio_stream
        .write_all(&[&4u32.to_be_bytes()[..], b"aaaa"].concat())
        .await
        .unwrap();

    wait_until(|| data.frames.lock().len() == 2).await;

    manager.destroy_all_channels().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_requests_are_rejected() {
    let listener = Arc::new(RecordingManagerListener::default());
    let manager = ChannelManager::new(1, Arc::downgrade(&listener) as _);
    let data = Arc::new(RecordingDataListener::default());

    let req = request(ModuleType::Rtsp, LinkType::Tcp, EndType::Source, "127.0.0.1", -1);
    manager
        .create_channel(req.clone(), data.clone())
        .await
        .unwrap();

    let err = manager.create_channel(req, data.clone()).await.unwrap_err();
    assert!(matches!(err, ChannelError::DuplicateRequest));

    manager.destroy_all_channels().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn vtp_role_selection_listens_on_sink() {
    let listener = Arc::new(RecordingManagerListener::default());
    let manager = ChannelManager::new(1, Arc::downgrade(&listener) as _);
    let data = Arc::new(RecordingDataListener::default());

    // sink + vtp takes the listening role, so creation succeeds without a
    // reachable peer
    let port = manager
        .create_channel(
            request(ModuleType::Video, LinkType::Vtp, EndType::Sink, "203.0.113.1", 1),
            data.clone(),
        )
        .await
        .unwrap();
    assert!(port > 0);

    manager.destroy_all_channels().await;
}

// ---- bus ---------------------------------------------------------------

#[derive(Default)]
struct FakeBus {
    servers: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    sent_bytes: Mutex<Vec<(i32, Vec<u8>)>>,
    next_id: AtomicI32,
    names: Mutex<std::collections::HashMap<i32, String>>,
}

impl BusBackend for FakeBus {
    fn create_session_server(&self, _package: &str, session_name: &str) -> i32 {
        self.servers.lock().push(session_name.to_string());
        0
    }

    fn remove_session_server(&self, _package: &str, _session_name: &str) -> i32 {
        0
    }

    fn open_session(
        &self,
        my_name: &str,
        _peer_name: &str,
        _peer_network_id: &str,
        _kind: BusPayloadKind,
    ) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.opened.lock().push(my_name.to_string());
        self.names.lock().insert(id, my_name.to_string());
        id
    }

    fn close_session(&self, _session_id: i32) {}

    fn send_bytes(&self, session_id: i32, data: &[u8]) -> i32 {
        self.sent_bytes.lock().push((session_id, data.to_vec()));
        0
    }

    fn send_stream(&self, session_id: i32, data: &[u8]) -> i32 {
        self.send_bytes(session_id, data)
    }

    fn send_file(&self, _session_id: i32, _files: &[String]) -> i32 {
        0
    }

    fn my_session_name(&self, session_id: i32) -> String {
        self.names.lock().get(&session_id).cloned().unwrap_or_default()
    }

    fn peer_session_name(&self, session_id: i32) -> String {
        self.my_session_name(session_id)
    }

    fn peer_device_id(&self, _session_id: i32) -> String {
        "peer-device".into()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bus_channel_opens_sends_and_dispatches() {
    let backend = Arc::new(FakeBus::default());
    BusRegistry::init(backend.clone());

    let listener = Arc::new(RecordingManagerListener::default());
    let manager = ChannelManager::new(1, Arc::downgrade(&listener) as _);
    let data = Arc::new(RecordingDataListener::default());

    // sink + bus is the active opener
    manager
        .create_channel(
            request(ModuleType::Rtsp, LinkType::SoftBus, EndType::Sink, "", 5),
            data.clone(),
        )
        .await
        .unwrap();

    assert_eq!(backend.opened.lock()[0], "CastPlusNetSessionRTSP5");

    // the bus reports the session open
    BusRegistry::dispatch(BusEvent::SessionOpened {
        session_id: 1,
        result: 0,
    });
    wait_until(|| !listener.created.lock().is_empty()).await;

    // inbound bytes reach the data listener
    BusRegistry::dispatch(BusEvent::BytesReceived {
        session_id: 1,
        data: b"ping".to_vec(),
    });
    wait_until(|| !data.frames.lock().is_empty()).await;
    assert_eq!(data.frames.lock()[0], b"ping");

    // outbound bytes go through the backend unframed
    let channel = listener.created.lock()[0].1.clone();
    assert!(channel.send(b"pong").await);
    assert_eq!(backend.sent_bytes.lock()[0], (1, b"pong".to_vec()));

    // remote close surfaces as removal
    BusRegistry::dispatch(BusEvent::SessionClosed { session_id: 1 });
    wait_until(|| !listener.removed.lock().is_empty()).await;

    BusRegistry::teardown();
}
