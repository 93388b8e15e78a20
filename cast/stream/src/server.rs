use crate::local::LocalFileChannelClient;
use crate::media::{MediaInfo, MediaInfoHolder};
use crate::queue::ActionQueue;
use crate::{
    actions, json::*, keys, LoopMode, PlaybackSpeed, PlayerState, StreamListener, StreamPlayer,
    AUTO_POSITION_SYNC_INTERVAL_MS, CAST_STREAM_INT_IGNORE, CAST_STREAM_INT_INVALID,
    MODULE_EVENT_ID_CALLBACK_EVENT, MODULE_EVENT_ID_CHANNEL_CREATE, MODULE_EVENT_ID_CONTROL_EVENT,
};
use channel::{Channel, ChannelListener};
use parking_lot::Mutex;
use rtsp_types::EventId;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sink side of the stream bridge: dispatches the source's commands to the
/// opaque player and sends the player's callbacks back.
///
/// The locally known playback position is echoed to the peer every 10 s so
/// the source's extrapolated clock cannot drift unbounded.
pub struct StreamBridgeServer {
    listener: Arc<dyn StreamListener>,
    player: Mutex<Option<Arc<dyn StreamPlayer>>>,
    queue: ActionQueue,
    file_channel: Arc<LocalFileChannelClient>,
    current_position: Mutex<i32>,
    sync_ticker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamBridgeServer {
    pub fn new(listener: Arc<dyn StreamListener>) -> Arc<Self> {
        let server = Arc::new_cyclic(|weak: &Weak<StreamBridgeServer>| {
            let queue_weak = weak.clone();
            StreamBridgeServer {
                listener,
                player: Mutex::new(None),
                queue: ActionQueue::new(move |action, data| {
                    if let Some(server) = queue_weak.upgrade() {
                        server.handle_action(action, data);
                    }
                }),
                file_channel: LocalFileChannelClient::new(weak.clone()),
                current_position: Mutex::new(CAST_STREAM_INT_INVALID),
                sync_ticker: Mutex::new(None),
            }
        });
        server.start_position_sync();
        server
    }

    pub fn set_player(&self, player: Arc<dyn StreamPlayer>) {
        *self.player.lock() = Some(player);
    }

    fn player(&self) -> Option<Arc<dyn StreamPlayer>> {
        let player = self.player.lock().clone();
        if player.is_none() {
            log::error!("player is not attached");
        }
        player
    }

    pub fn file_channel(&self) -> Arc<LocalFileChannelClient> {
        self.file_channel.clone()
    }

    /// Listener for the local-file channel once the session created it.
    pub fn channel_listener(&self) -> Arc<dyn ChannelListener> {
        self.file_channel.clone()
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        self.file_channel.add_channel(channel);
    }

    pub fn remove_channel(&self) {
        self.file_channel.remove_channel();
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
        if let Some(handle) = self.sync_ticker.lock().take() {
            handle.abort();
        }
    }

    // ---- inbound ------------------------------------------------------

    fn is_known_action(action: &str) -> bool {
        matches!(
            action,
            actions::LOAD
                | actions::PLAY
                | actions::PAUSE
                | actions::RESUME
                | actions::STOP
                | actions::NEXT
                | actions::PREVIOUS
                | actions::SEEK
                | actions::FAST_FORWARD
                | actions::FAST_REWIND
                | actions::SET_VOLUME
                | actions::SET_MUTE
                | actions::SET_REPEAT_MODE
                | actions::SET_SPEED
        )
    }

    /// Entry point for serialized stream-channel events.
    pub fn process_actions_event(&self, event_id: i32, param: &str) {
        let Ok(data) = serde_json::from_str::<Value>(param) else {
            log::error!("malformed stream event payload");
            return;
        };
        let Some(body) = data.get(keys::KEY_DATA).cloned() else {
            log::error!("stream event without data");
            return;
        };
        let key = if event_id == MODULE_EVENT_ID_CONTROL_EVENT {
            keys::KEY_ACTION
        } else {
            keys::KEY_CALLBACK_ACTION
        };
        let Some(action) = get_str(&data, key) else {
            log::error!("stream event without action");
            return;
        };
        if !Self::is_known_action(&action) {
            log::error!("unsupported action {action}");
            return;
        }
        self.queue.enqueue(action, body);
    }

    fn handle_action(&self, action: &str, data: &Value) {
        let handled = match action {
            actions::LOAD => self.process_action_load(data),
            actions::PLAY => self.process_action_play(data),
            actions::PAUSE => self.player().map(|p| p.pause()).unwrap_or(false),
            actions::RESUME => self.player().map(|p| p.play()).unwrap_or(false),
            actions::STOP => self.player().map(|p| p.stop()).unwrap_or(false),
            actions::NEXT => self.player().map(|p| p.next()).unwrap_or(false),
            actions::PREVIOUS => self.player().map(|p| p.previous()).unwrap_or(false),
            actions::SEEK => self.process_action_seek(data),
            actions::FAST_FORWARD => self.process_action_fast_forward(data),
            actions::FAST_REWIND => self.process_action_fast_rewind(data),
            actions::SET_VOLUME => self.process_action_set_volume(data),
            actions::SET_MUTE => self.process_action_set_mute(data),
            actions::SET_REPEAT_MODE => self.process_action_set_repeat_mode(data),
            actions::SET_SPEED => self.process_action_set_speed(data),
            _ => {
                log::warn!("dropping unknown action {action}");
                true
            }
        };
        if !handled {
            log::error!("dropping malformed action {action}");
        }
    }

    fn process_action_load(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(holder) = MediaInfoHolder::parse(data, false) else {
            log::error!("malformed media list in load");
            return false;
        };
        let Some(front) = holder.media_info_list.first() else {
            return false;
        };
        player.load(front)
    }

    fn process_action_play(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(holder) = MediaInfoHolder::parse(data, false) else {
            log::error!("malformed media list in play");
            return false;
        };
        let Some(front) = holder.media_info_list.first() else {
            return false;
        };
        player.inner_play(front)
    }

    fn process_action_seek(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(position) = get_i32(data, keys::KEY_POSITION) else {
            return false;
        };
        log::info!("seek to {position}");
        player.seek(position)
    }

    fn process_action_fast_forward(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(delta) = get_i32(data, keys::KEY_DELTA) else {
            return false;
        };
        player.fast_forward(delta)
    }

    fn process_action_fast_rewind(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(delta) = get_i32(data, keys::KEY_DELTA) else {
            return false;
        };
        player.fast_rewind(delta)
    }

    fn process_action_set_volume(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(volume) = get_i32(data, keys::KEY_VOLUME) else {
            return false;
        };
        log::info!("set volume {volume}");
        player.set_volume(volume)
    }

    fn process_action_set_mute(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(mute) = get_bool(data, keys::KEY_MUTE) else {
            return false;
        };
        player.set_mute(mute)
    }

    fn process_action_set_repeat_mode(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(mode) = get_i32(data, keys::KEY_MODE) else {
            return false;
        };
        player.set_loop_mode(LoopMode::from_i32(mode))
    }

    fn process_action_set_speed(&self, data: &Value) -> bool {
        let Some(player) = self.player() else {
            return false;
        };
        let Some(speed) = get_i32(data, keys::KEY_SPEED) else {
            return false;
        };
        player.set_speed(PlaybackSpeed::from_i32(speed))
    }

    // ---- outbound callbacks -------------------------------------------

    fn send_callback_action(&self, action: &str, body: Value) -> bool {
        let data = json!({
            keys::KEY_CALLBACK_ACTION: action,
            keys::KEY_DATA: body,
        });
        self.listener
            .send_action_to_peers(MODULE_EVENT_ID_CALLBACK_EVENT, &data.to_string())
    }

    pub fn notify_peer_player_status_changed(
        &self,
        state: PlayerState,
        is_play_when_ready: bool,
    ) -> bool {
        self.send_callback_action(
            actions::PLAYER_STATUS_CHANGED,
            json!({
                keys::KEY_PLAYBACK_STATE: state as i32,
                keys::KEY_IS_PLAY_WHEN_READY: is_play_when_ready,
            }),
        )
    }

    pub fn notify_peer_position_changed(
        &self,
        position: i32,
        buffer_position: i32,
        duration: i32,
    ) -> bool {
        if position != CAST_STREAM_INT_IGNORE {
            *self.current_position.lock() = position;
        }
        self.send_callback_action(
            actions::POSITION_CHANGED,
            json!({
                keys::KEY_POSITION: position,
                keys::KEY_BUFFER_POSITION: buffer_position,
                keys::KEY_DURATION: duration,
            }),
        )
    }

    pub fn notify_peer_media_item_changed(&self, media: &MediaInfo) -> bool {
        self.send_callback_action(actions::MEDIA_ITEM_CHANGED, media.encap(false))
    }

    pub fn notify_peer_volume_changed(&self, volume: i32, max_volume: i32) -> bool {
        self.send_callback_action(
            actions::VOLUME_CHANGED,
            json!({
                keys::KEY_VOLUME: volume,
                keys::KEY_MAX_VOLUME: max_volume,
            }),
        )
    }

    pub fn notify_peer_repeat_mode_changed(&self, mode: LoopMode) -> bool {
        self.send_callback_action(
            actions::REPEAT_MODE_CHANGED,
            json!({ keys::KEY_REPEAT_MODE: mode as i32 }),
        )
    }

    pub fn notify_peer_play_speed_changed(&self, speed: PlaybackSpeed) -> bool {
        self.send_callback_action(
            actions::SPEED_CHANGED,
            json!({ keys::KEY_SPEED: speed as i32 }),
        )
    }

    pub fn notify_peer_player_error(&self, error_code: i32, error_msg: &str) -> bool {
        self.send_callback_action(
            actions::PLAYER_ERROR,
            json!({
                keys::KEY_ERROR_CODE: error_code,
                keys::KEY_ERROR_MSG: error_msg,
            }),
        )
    }

    pub fn notify_peer_next_request(&self) -> bool {
        self.send_callback_action(actions::NEXT_REQUEST, json!({}))
    }

    pub fn notify_peer_previous_request(&self) -> bool {
        self.send_callback_action(actions::PREVIOUS_REQUEST, json!({}))
    }

    pub fn notify_peer_seek_done(&self, position: i32) -> bool {
        self.send_callback_action(actions::SEEK_DONE, json!({ keys::KEY_POSITION: position }))
    }

    pub fn notify_peer_end_of_stream(&self, is_looping: i32) -> bool {
        self.send_callback_action(
            actions::END_OF_STREAM,
            json!({ keys::KEY_IS_LOOPING: is_looping }),
        )
    }

    /// The sink asks the source to start playing a new item; shaped like
    /// `play` but travelling as a control action.
    pub fn notify_peer_play_request(&self, media: &MediaInfo) -> bool {
        let data = json!({
            keys::KEY_ACTION: actions::PLAY_REQUEST,
            keys::KEY_DATA: MediaInfoHolder::encap_single(media, false),
        });
        self.listener
            .send_action_to_peers(MODULE_EVENT_ID_CONTROL_EVENT, &data.to_string())
    }

    /// Ask the peer to create the local-file channel.
    pub fn notify_peer_create_channel(&self) -> bool {
        self.listener
            .send_action_to_peers(MODULE_EVENT_ID_CHANNEL_CREATE, "")
    }

    pub fn on_render_ready(&self, is_ready: bool) {
        log::debug!("render ready {is_ready}");
        self.listener.on_render_ready(is_ready);
    }

    pub fn on_event(&self, event: EventId, data: &str) {
        self.listener.on_event(event, data);
    }

    /// Periodic echo of the played position for drift correction on the
    /// controlling side.
    fn start_position_sync(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        *self.sync_ticker.lock() = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(AUTO_POSITION_SYNC_INTERVAL_MS)).await;
                let Some(server) = weak.upgrade() else {
                    return;
                };
                let position = *server.current_position.lock();
                if position != CAST_STREAM_INT_INVALID {
                    server.notify_peer_position_changed(
                        position,
                        CAST_STREAM_INT_IGNORE,
                        CAST_STREAM_INT_IGNORE,
                    );
                }
            }
        }));
    }
}
