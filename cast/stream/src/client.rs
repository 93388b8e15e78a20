use crate::media::{MediaInfo, MediaInfoHolder};
use crate::queue::ActionQueue;
use crate::{
    actions, json::*, keys, LoopMode, PlaybackSpeed, PlayerState, StreamListener,
    StreamPlayerListener, AUTO_POSITION_UPDATE_INTERVAL_MS, CAST_STREAM_INT_IGNORE,
    CAST_STREAM_INT_INVALID, MODULE_EVENT_ID_CONTROL_EVENT, POSITION_LAG_MAXIMUM,
    POSITION_LAG_MINIMUM,
};
use parking_lot::Mutex;
use rtsp_types::EventId;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct ClientState {
    current_state: PlayerState,
    current_position: i32,
    current_duration: i32,
    current_buffer: i32,
    current_volume: i32,
    max_volume: i32,
    is_mute: bool,
    current_mode: LoopMode,
    current_speed: PlaybackSpeed,
    start_position: i32,
    seek_position: i32,
    is_seeking: bool,
    is_new_resource_loaded: bool,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            current_state: PlayerState::Idle,
            current_position: CAST_STREAM_INT_INVALID,
            current_duration: CAST_STREAM_INT_INVALID,
            current_buffer: CAST_STREAM_INT_INVALID,
            current_volume: CAST_STREAM_INT_INVALID,
            max_volume: CAST_STREAM_INT_INVALID,
            is_mute: false,
            current_mode: LoopMode::Sequence,
            current_speed: PlaybackSpeed::SpeedForward100,
            start_position: CAST_STREAM_INT_INVALID,
            seek_position: CAST_STREAM_INT_INVALID,
            is_seeking: false,
            is_new_resource_loaded: false,
        }
    }
}

/// Source side of the stream bridge: sends player commands to the sink and
/// reflects the callbacks it receives into a local player-state mirror.
///
/// Between position callbacks a 100 ms ticker extrapolates the playback
/// clock; an incoming position within the lag window leaves the ticker
/// authoritative, anything outside it is forwarded immediately.
pub struct StreamBridgeClient {
    listener: Arc<dyn StreamListener>,
    player_listener: Mutex<Option<Arc<dyn StreamPlayerListener>>>,
    state: Mutex<ClientState>,
    queue: ActionQueue,
    ticker: Mutex<Option<JoinHandle<()>>>,
    is_double_frame: bool,
    weak_self: Weak<StreamBridgeClient>,
}

impl StreamBridgeClient {
    pub fn new(listener: Arc<dyn StreamListener>, is_double_frame: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<StreamBridgeClient>| {
            let queue_weak = weak.clone();
            StreamBridgeClient {
                listener,
                player_listener: Mutex::new(None),
                state: Mutex::new(ClientState::default()),
                queue: ActionQueue::new(move |action, data| {
                    if let Some(client) = queue_weak.upgrade() {
                        client.handle_action(action, data);
                    }
                }),
                ticker: Mutex::new(None),
                is_double_frame,
                weak_self: weak.clone(),
            }
        })
    }

    pub fn is_double_frame(&self) -> bool {
        self.is_double_frame
    }

    pub fn register_listener(&self, listener: Arc<dyn StreamPlayerListener>) -> bool {
        *self.player_listener.lock() = Some(listener);
        true
    }

    pub fn unregister_listener(&self) -> bool {
        *self.player_listener.lock() = None;
        true
    }

    fn player_listener(&self) -> Option<Arc<dyn StreamPlayerListener>> {
        let listener = self.player_listener.lock().clone();
        if listener.is_none() {
            log::error!("player listener is not registered");
        }
        listener
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.stop_ticker();
    }

    // ---- inbound ------------------------------------------------------

    fn is_known_action(action: &str) -> bool {
        matches!(
            action,
            actions::PLAYER_STATUS_CHANGED
                | actions::POSITION_CHANGED
                | actions::MEDIA_ITEM_CHANGED
                | actions::VOLUME_CHANGED
                | actions::REPEAT_MODE_CHANGED
                | actions::SPEED_CHANGED
                | actions::PLAYER_ERROR
                | actions::NEXT_REQUEST
                | actions::PREVIOUS_REQUEST
                | actions::SEEK_DONE
                | actions::END_OF_STREAM
                | actions::PLAY_REQUEST
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
            actions::PLAYER_STATUS_CHANGED => self.process_player_status_changed(data),
            actions::POSITION_CHANGED => self.process_position_changed(data),
            actions::MEDIA_ITEM_CHANGED => self.process_media_item_changed(data),
            actions::VOLUME_CHANGED => self.process_volume_changed(data),
            actions::REPEAT_MODE_CHANGED => self.process_repeat_mode_changed(data),
            actions::SPEED_CHANGED => self.process_speed_changed(data),
            actions::PLAYER_ERROR => self.process_player_error(data),
            actions::NEXT_REQUEST => self.process_next_request(),
            actions::PREVIOUS_REQUEST => self.process_previous_request(),
            actions::SEEK_DONE => self.process_seek_done(data),
            actions::END_OF_STREAM => self.process_end_of_stream(data),
            actions::PLAY_REQUEST => self.process_play_request(data),
            _ => {
                log::warn!("dropping unknown action {action}");
                true
            }
        };
        if !handled {
            log::error!("dropping malformed action {action}");
        }
    }

    // ---- position ticker ----------------------------------------------

    fn start_ticker(&self) {
        let mut ticker = self.ticker.lock();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        let weak = self.weak_self.clone();
        *ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(AUTO_POSITION_UPDATE_INTERVAL_MS)).await;
                let Some(client) = weak.upgrade() else {
                    return;
                };
                if !client.auto_update_cur_position() {
                    return;
                }
            }
        }));
    }

    fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }

    fn ticker_stopped(&self) -> bool {
        self.ticker.lock().is_none()
    }

    fn auto_update_cur_position(&self) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let position = {
            let mut state = self.state.lock();
            state.current_position += AUTO_POSITION_UPDATE_INTERVAL_MS as i32;
            state.current_position
        };
        listener.on_position_changed(position, CAST_STREAM_INT_IGNORE, CAST_STREAM_INT_IGNORE);
        true
    }

    // ---- callback handlers --------------------------------------------

    fn process_player_status_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(state) = get_i32(data, keys::KEY_PLAYBACK_STATE) else {
            return false;
        };
        let Some(is_play_when_ready) = get_bool(data, keys::KEY_IS_PLAY_WHEN_READY) else {
            return false;
        };

        let playback_state = PlayerState::from_i32(state);
        self.state.lock().current_state = playback_state;
        log::info!("playback state {playback_state:?}, play when ready {is_play_when_ready}");
        listener.on_state_changed(playback_state, is_play_when_ready);

        if playback_state == PlayerState::Started {
            if self.ticker_stopped() {
                listener.on_position_changed(
                    self.position(),
                    CAST_STREAM_INT_IGNORE,
                    CAST_STREAM_INT_IGNORE,
                );
                self.start_ticker();
            }
        } else if !self.ticker_stopped() {
            listener.on_position_changed(
                self.position(),
                CAST_STREAM_INT_IGNORE,
                CAST_STREAM_INT_IGNORE,
            );
            self.stop_ticker();
        }
        true
    }

    fn process_position_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(position) = get_i32(data, keys::KEY_POSITION) else {
            return false;
        };
        let Some(buffer_position) = get_i32(data, keys::KEY_BUFFER_POSITION) else {
            return false;
        };
        let Some(duration) = get_i32(data, keys::KEY_DURATION) else {
            return false;
        };

        let (current_state, forward) = {
            let mut state = self.state.lock();
            if duration != CAST_STREAM_INT_IGNORE {
                state.current_duration = duration;
            }
            if buffer_position != CAST_STREAM_INT_IGNORE {
                state.current_buffer = buffer_position;
            }
            let mut forward = true;
            if position != CAST_STREAM_INT_IGNORE {
                let extrapolated = state.current_position;
                if extrapolated != CAST_STREAM_INT_INVALID {
                    // a drift within the lag window leaves the local clock
                    // authoritative
                    let lag = (position - extrapolated).abs();
                    if lag > POSITION_LAG_MINIMUM && lag < POSITION_LAG_MAXIMUM {
                        forward = false;
                    }
                }
                state.current_position = position;
            }
            (state.current_state, forward)
        };

        if position != CAST_STREAM_INT_IGNORE && current_state == PlayerState::Started {
            self.start_ticker();
        }
        if self.is_double_frame {
            self.detect_seek_done(position);
        }

        log::debug!("position {position}, buffer {buffer_position}, duration {duration}");
        if forward {
            listener.on_position_changed(position, buffer_position, duration);
        }
        true
    }

    fn detect_seek_done(&self, position: i32) {
        let Some(listener) = self.player_listener() else {
            return;
        };
        let mut state = self.state.lock();
        if state.is_new_resource_loaded && state.start_position == position {
            state.is_new_resource_loaded = false;
            drop(state);
            listener.on_seek_done(position);
            return;
        }
        if state.is_seeking && state.seek_position == position {
            state.is_seeking = false;
            drop(state);
            listener.on_seek_done(position);
        }
    }

    fn process_media_item_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(media) = MediaInfo::parse(data, self.is_double_frame) else {
            return false;
        };
        listener.on_media_item_changed(&media);

        let mut state = self.state.lock();
        state.is_new_resource_loaded = true;
        state.current_state = PlayerState::Idle;
        true
    }

    fn process_volume_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(volume) = get_i32(data, keys::KEY_VOLUME) else {
            return false;
        };
        let max_volume = if self.is_double_frame {
            // dual-frame peers do not carry their scale
            15
        } else {
            match get_i32(data, keys::KEY_MAX_VOLUME) {
                Some(max_volume) => max_volume,
                None => return false,
            }
        };

        {
            let mut state = self.state.lock();
            state.current_volume = volume;
            state.max_volume = max_volume;
            state.is_mute = volume == 0;
        }
        log::info!("volume {volume}, max volume {max_volume}");
        listener.on_volume_changed(volume, max_volume);
        true
    }

    fn process_repeat_mode_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(mode) = get_i32(data, keys::KEY_REPEAT_MODE) else {
            return false;
        };
        let mode = LoopMode::from_i32(mode);
        self.state.lock().current_mode = mode;
        listener.on_loop_mode_changed(mode);
        true
    }

    fn process_speed_changed(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(speed) = get_i32(data, keys::KEY_SPEED) else {
            return false;
        };
        let speed = PlaybackSpeed::from_i32(speed);
        self.state.lock().current_speed = speed;
        listener.on_play_speed_changed(speed);
        true
    }

    fn process_player_error(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(error_code) = get_i32(data, keys::KEY_ERROR_CODE) else {
            return false;
        };
        let Some(error_msg) = get_str(data, keys::KEY_ERROR_MSG) else {
            return false;
        };
        log::error!("peer player error {error_code}: {error_msg}");
        listener.on_player_error(error_code, &error_msg);
        true
    }

    fn process_next_request(&self) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        listener.on_next_request();
        true
    }

    fn process_previous_request(&self) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        listener.on_previous_request();
        true
    }

    fn process_seek_done(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(position) = get_i32(data, keys::KEY_POSITION) else {
            return false;
        };
        listener.on_seek_done(position);
        true
    }

    fn process_end_of_stream(&self, data: &Value) -> bool {
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(is_looping) = get_i32(data, keys::KEY_IS_LOOPING) else {
            return false;
        };
        listener.on_end_of_stream(is_looping);
        true
    }

    fn process_play_request(&self, data: &Value) -> bool {
        let Some(holder) = MediaInfoHolder::parse(data, false) else {
            return false;
        };
        let Some(listener) = self.player_listener() else {
            return false;
        };
        let Some(front) = holder.media_info_list.first() else {
            return false;
        };
        listener.on_play_request(front);
        true
    }

    // ---- outbound commands --------------------------------------------

    fn send_control_action(&self, action: &str, body: Value) -> bool {
        let data = json!({
            keys::KEY_ACTION: action,
            keys::KEY_DATA: body,
        });
        self.listener
            .send_action_to_peers(MODULE_EVENT_ID_CONTROL_EVENT, &data.to_string())
    }

    fn reset_positions(&self, media: &MediaInfo) {
        let mut state = self.state.lock();
        state.start_position = media.start_position;
        state.current_position = CAST_STREAM_INT_INVALID;
        state.current_duration = CAST_STREAM_INT_INVALID;
        state.current_buffer = CAST_STREAM_INT_INVALID;
    }

    pub fn notify_peer_load(&self, media: &MediaInfo) -> bool {
        self.reset_positions(media);
        let body = MediaInfoHolder::encap_single(media, self.is_double_frame);
        self.send_control_action(actions::LOAD, body)
    }

    pub fn notify_peer_play(&self, media: &MediaInfo) -> bool {
        self.reset_positions(media);
        let body = MediaInfoHolder::encap_single(media, self.is_double_frame);
        self.send_control_action(actions::PLAY, body)
    }

    pub fn notify_peer_pause(&self) -> bool {
        self.send_control_action(actions::PAUSE, json!({}))
    }

    pub fn notify_peer_resume(&self) -> bool {
        self.send_control_action(actions::RESUME, json!({}))
    }

    pub fn notify_peer_stop(&self) -> bool {
        self.send_control_action(actions::STOP, json!({}))
    }

    pub fn notify_peer_next(&self) -> bool {
        self.send_control_action(actions::NEXT, json!({}))
    }

    pub fn notify_peer_previous(&self) -> bool {
        self.send_control_action(actions::PREVIOUS, json!({}))
    }

    pub fn notify_peer_seek(&self, position: i32) -> bool {
        {
            let mut state = self.state.lock();
            state.is_seeking = true;
            state.seek_position = position;
        }
        self.send_control_action(actions::SEEK, json!({ keys::KEY_POSITION: position }))
    }

    pub fn notify_peer_fast_forward(&self, delta: i32) -> bool {
        self.send_control_action(actions::FAST_FORWARD, json!({ keys::KEY_DELTA: delta }))
    }

    pub fn notify_peer_fast_rewind(&self, delta: i32) -> bool {
        self.send_control_action(actions::FAST_REWIND, json!({ keys::KEY_DELTA: delta }))
    }

    pub fn notify_peer_set_volume(&self, volume: i32) -> bool {
        self.send_control_action(actions::SET_VOLUME, json!({ keys::KEY_VOLUME: volume }))
    }

    pub fn notify_peer_set_mute(&self, mute: bool) -> bool {
        self.send_control_action(actions::SET_MUTE, json!({ keys::KEY_MUTE: mute }))
    }

    pub fn notify_peer_set_repeat_mode(&self, mode: i32) -> bool {
        self.send_control_action(actions::SET_REPEAT_MODE, json!({ keys::KEY_MODE: mode }))
    }

    pub fn notify_peer_set_speed(&self, speed: i32) -> bool {
        self.send_control_action(actions::SET_SPEED, json!({ keys::KEY_SPEED: speed }))
    }

    // ---- reflected state ----------------------------------------------

    pub fn player_status(&self) -> PlayerState {
        self.state.lock().current_state
    }

    pub fn position(&self) -> i32 {
        self.state.lock().current_position
    }

    pub fn duration(&self) -> i32 {
        self.state.lock().current_duration
    }

    pub fn volume(&self) -> i32 {
        self.state.lock().current_volume
    }

    pub fn max_volume(&self) -> i32 {
        self.state.lock().max_volume
    }

    pub fn mute(&self) -> bool {
        let mut state = self.state.lock();
        state.is_mute = state.current_volume == 0;
        state.is_mute
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.state.lock().current_mode
    }

    pub fn play_speed(&self) -> PlaybackSpeed {
        self.state.lock().current_speed
    }

    /// Consume the peer's capability blob negotiated over the control
    /// channel.
    pub fn handle_custom_negotiation_params(&self, player_params: &str) -> String {
        let Ok(data) = serde_json::from_str::<Value>(player_params) else {
            log::error!("malformed player params");
            return String::new();
        };
        let Some(volume) = get_i32(&data, keys::KEY_PARAMS_STREAM_VOLUME) else {
            return String::new();
        };
        let Some(max_volume) = get_i32(&data, keys::KEY_MAX_VOLUME) else {
            return String::new();
        };

        let mut state = self.state.lock();
        state.current_volume = volume;
        state.max_volume = max_volume;
        log::info!("peer volume {volume}, max volume {max_volume}");
        String::new()
    }

    pub fn on_event(&self, event: EventId, data: &str) {
        self.listener.on_event(event, data);
    }
}
