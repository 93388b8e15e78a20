//! Action protocol scenarios between the bridge endpoints.

use parking_lot::Mutex;
use rtsp_types::EventId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use castlink_stream::{
    LoopMode, MediaInfo, PlaybackSpeed, PlayerState, RemotePlayerController, StreamBridgeClient,
    StreamBridgeServer, StreamListener, StreamPlayer, StreamPlayerListener,
    MODULE_EVENT_ID_CALLBACK_EVENT, MODULE_EVENT_ID_CONTROL_EVENT,
};

#[derive(Default)]
struct RecordingStreamListener {
    sent: Mutex<Vec<(i32, String)>>,
}

impl StreamListener for RecordingStreamListener {
    fn send_action_to_peers(&self, event_id: i32, param: &str) -> bool {
        self.sent.lock().push((event_id, param.to_string()));
        true
    }

    fn on_render_ready(&self, _is_ready: bool) {}

    fn on_event(&self, _event: EventId, _data: &str) {}
}

#[derive(Default)]
struct RecordingPlayer {
    loaded: Mutex<Vec<MediaInfo>>,
    played: Mutex<Vec<MediaInfo>>,
    seeks: Mutex<Vec<i32>>,
    volumes: Mutex<Vec<i32>>,
    pauses: AtomicUsize,
}

impl StreamPlayer for RecordingPlayer {
    fn load(&self, media: &MediaInfo) -> bool {
        self.loaded.lock().push(media.clone());
        true
    }

    fn inner_play(&self, media: &MediaInfo) -> bool {
        self.played.lock().push(media.clone());
        true
    }

    fn play(&self) -> bool {
        true
    }

    fn pause(&self) -> bool {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn stop(&self) -> bool {
        true
    }

    fn next(&self) -> bool {
        true
    }

    fn previous(&self) -> bool {
        true
    }

    fn seek(&self, position: i32) -> bool {
        self.seeks.lock().push(position);
        true
    }

    fn fast_forward(&self, _delta: i32) -> bool {
        true
    }

    fn fast_rewind(&self, _delta: i32) -> bool {
        true
    }

    fn set_volume(&self, volume: i32) -> bool {
        self.volumes.lock().push(volume);
        true
    }

    fn set_mute(&self, _mute: bool) -> bool {
        true
    }

    fn set_loop_mode(&self, _mode: LoopMode) -> bool {
        true
    }

    fn set_speed(&self, _speed: PlaybackSpeed) -> bool {
        true
    }
}

#[derive(Default)]
struct RecordingPlayerListener {
    states: Mutex<Vec<(PlayerState, bool)>>,
    positions: Mutex<Vec<(i32, i32, i32)>>,
    media_items: Mutex<Vec<MediaInfo>>,
    volumes: Mutex<Vec<(i32, i32)>>,
    errors: Mutex<Vec<(i32, String)>>,
    seek_dones: Mutex<Vec<i32>>,
}

impl StreamPlayerListener for RecordingPlayerListener {
    fn on_state_changed(&self, state: PlayerState, is_play_when_ready: bool) {
        self.states.lock().push((state, is_play_when_ready));
    }

    fn on_position_changed(&self, position: i32, buffer_position: i32, duration: i32) {
        self.positions.lock().push((position, buffer_position, duration));
    }

    fn on_media_item_changed(&self, media: &MediaInfo) {
        self.media_items.lock().push(media.clone());
    }

    fn on_volume_changed(&self, volume: i32, max_volume: i32) {
        self.volumes.lock().push((volume, max_volume));
    }

    fn on_loop_mode_changed(&self, _mode: LoopMode) {}

    fn on_play_speed_changed(&self, _speed: PlaybackSpeed) {}

    fn on_player_error(&self, error_code: i32, error_msg: &str) {
        self.errors.lock().push((error_code, error_msg.to_string()));
    }

    fn on_next_request(&self) {}

    fn on_previous_request(&self) {}

    fn on_seek_done(&self, position: i32) {
        self.seek_dones.lock().push(position);
    }

    fn on_end_of_stream(&self, _is_looping: i32) {}

    fn on_play_request(&self, _media: &MediaInfo) {}
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

const LOAD_PAYLOAD: &str = r#"{"ACTION":"load","DATA":{"CURRENT_INDEX":0,"PROGRESS_INTERVAL":0,"LIST":[{"MEDIA_ID":"a","MEDIA_NAME":"t","MEDIA_URL":"http://x","MEDIA_TYPE":"VIDEO","MEDIA_SIZE":0,"START_POSITION":0,"DURATION":0,"CLOSING_CREDITS_POSITION":0,"ALBUM_COVER_URL":"","ALBUM_TITLE":"","MEDIA_ARTIST":"","LRC_URL":"","LRC_CONTENT":"","APP_ICON_URL":"","APP_NAME":""}]}}"#;

#[tokio::test(start_paused = true)]
async fn load_action_reaches_the_player() {
    let listener = Arc::new(RecordingStreamListener::default());
    let server = StreamBridgeServer::new(listener);
    let player = Arc::new(RecordingPlayer::default());
    server.set_player(player.clone());

    server.process_actions_event(MODULE_EVENT_ID_CONTROL_EVENT, LOAD_PAYLOAD);
    settle().await;

    let loaded = player.loaded.lock();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].media_id, "a");
    assert_eq!(loaded[0].media_url, "http://x");
}

#[tokio::test(start_paused = true)]
async fn unknown_and_malformed_actions_are_dropped() {
    let listener = Arc::new(RecordingStreamListener::default());
    let server = StreamBridgeServer::new(listener);
    let player = Arc::new(RecordingPlayer::default());
    server.set_player(player.clone());

    server.process_actions_event(
        MODULE_EVENT_ID_CONTROL_EVENT,
        r#"{"ACTION":"teleport","DATA":{}}"#,
    );
    // seek without POSITION is dropped by the handler
    server.process_actions_event(
        MODULE_EVENT_ID_CONTROL_EVENT,
        r#"{"ACTION":"seek","DATA":{}}"#,
    );
    settle().await;

    assert!(player.seeks.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn actions_are_processed_in_fifo_order() {
    let listener = Arc::new(RecordingStreamListener::default());
    let server = StreamBridgeServer::new(listener);
    let player = Arc::new(RecordingPlayer::default());
    server.set_player(player.clone());

    for position in [10, 20, 30, 40] {
        server.process_actions_event(
            MODULE_EVENT_ID_CONTROL_EVENT,
            &format!(r#"{{"ACTION":"seek","DATA":{{"POSITION":{position}}}}}"#),
        );
    }
    settle().await;

    assert_eq!(*player.seeks.lock(), vec![10, 20, 30, 40]);
}

#[tokio::test(start_paused = true)]
async fn controller_validates_before_sending() {
    let listener = Arc::new(RecordingStreamListener::default());
    let client = StreamBridgeClient::new(listener.clone(), false);
    let controller = RemotePlayerController::new(
        client,
        castlink_stream::local::LocalFileChannelServer::new(),
    );

    assert!(!controller.set_volume(-1));
    assert!(!controller.set_volume(101));
    assert!(!controller.seek(-1));
    assert!(!controller.fast_forward(0));
    assert!(!controller.fast_rewind(-3));
    assert!(listener.sent.lock().is_empty(), "nothing may reach the peer");

    assert!(controller.set_volume(55));
    assert!(controller.seek(1234));
    let sent = listener.sent.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, MODULE_EVENT_ID_CONTROL_EVENT);
    assert!(sent[0].1.contains("setVolume"));
    assert!(sent[1].1.contains("\"POSITION\":1234"));
}

#[tokio::test(start_paused = true)]
async fn callbacks_update_the_reflected_state() {
    let listener = Arc::new(RecordingStreamListener::default());
    let client = StreamBridgeClient::new(listener, false);
    let observer = Arc::new(RecordingPlayerListener::default());
    client.register_listener(observer.clone());

    client.process_actions_event(
        MODULE_EVENT_ID_CALLBACK_EVENT,
        r#"{"CALLBACK_ACTION":"onVolumeChanged","DATA":{"VOLUME":30,"MAX_VOLUME":100}}"#,
    );
    client.process_actions_event(
        MODULE_EVENT_ID_CALLBACK_EVENT,
        r#"{"CALLBACK_ACTION":"onPlayerStatusChanged","DATA":{"PLAYBACK_STATE":2,"IS_PLAY_WHEN_READY":true}}"#,
    );
    client.process_actions_event(
        MODULE_EVENT_ID_CALLBACK_EVENT,
        r#"{"CALLBACK_ACTION":"onPositionChanged","DATA":{"POSITION":5000,"BUFFER_POSITION":8000,"DURATION":60000}}"#,
    );
    settle().await;

    assert_eq!(client.volume(), 30);
    assert_eq!(client.max_volume(), 100);
    assert!(!client.mute());
    assert_eq!(client.player_status(), PlayerState::Started);
    assert_eq!(client.position(), 5000);
    assert_eq!(client.duration(), 60000);

    assert_eq!(*observer.volumes.lock(), vec![(30, 100)]);
    assert_eq!(observer.states.lock()[0], (PlayerState::Started, true));
    assert!(observer
        .positions
        .lock()
        .contains(&(5000, 8000, 60000)));

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn zero_volume_reflects_as_muted() {
    let listener = Arc::new(RecordingStreamListener::default());
    let client = StreamBridgeClient::new(listener, false);
    let observer = Arc::new(RecordingPlayerListener::default());
    client.register_listener(observer);

    client.process_actions_event(
        MODULE_EVENT_ID_CALLBACK_EVENT,
        r#"{"CALLBACK_ACTION":"onVolumeChanged","DATA":{"VOLUME":0,"MAX_VOLUME":100}}"#,
    );
    settle().await;

    assert!(client.mute());
}

#[tokio::test(start_paused = true)]
async fn server_callbacks_serialize_for_the_wire() {
    let listener = Arc::new(RecordingStreamListener::default());
    let server = StreamBridgeServer::new(listener.clone());

    server.notify_peer_player_status_changed(PlayerState::Paused, false);
    server.notify_peer_seek_done(777);
    server.notify_peer_player_error(10003, "load failed");

    let sent = listener.sent.lock();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(id, _)| *id == MODULE_EVENT_ID_CALLBACK_EVENT));

    let status: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
    assert_eq!(status["CALLBACK_ACTION"], "onPlayerStatusChanged");
    assert_eq!(status["DATA"]["PLAYBACK_STATE"], 3);
    assert_eq!(status["DATA"]["IS_PLAY_WHEN_READY"], false);

    let seek: serde_json::Value = serde_json::from_str(&sent[1].1).unwrap();
    assert_eq!(seek["DATA"]["POSITION"], 777);

    let error: serde_json::Value = serde_json::from_str(&sent[2].1).unwrap();
    assert_eq!(error["DATA"]["ERROR_CODE"], 10003);
    assert_eq!(error["DATA"]["ERROR_MSG"], "load failed");

    server.shutdown();
}
