use crate::local::LocalFileChannelServer;
use crate::{
    LoopMode, MediaInfo, PlaybackSpeed, PlayerState, StreamBridgeClient, StreamPlayerListener,
    CAST_STREAM_FULL_VOLUME,
};
use std::sync::Arc;

/// Control surface of the remote player, used by the source application.
///
/// Validates arguments before anything crosses the wire and rewrites local
/// media urls through the local-file channel so the sink can fetch them.
pub struct RemotePlayerController {
    client: Arc<StreamBridgeClient>,
    file_server: Arc<LocalFileChannelServer>,
}

impl RemotePlayerController {
    pub fn new(client: Arc<StreamBridgeClient>, file_server: Arc<LocalFileChannelServer>) -> Self {
        Self {
            client,
            file_server,
        }
    }

    pub fn file_server(&self) -> Arc<LocalFileChannelServer> {
        self.file_server.clone()
    }

    pub fn register_listener(&self, listener: Arc<dyn StreamPlayerListener>) -> bool {
        self.client.register_listener(listener)
    }

    pub fn unregister_listener(&self) -> bool {
        self.client.unregister_listener()
    }

    pub fn load(&self, media: &MediaInfo) -> bool {
        tracing::debug!(media_id = %media.media_id, "load");
        let mut media = media.clone();
        if !self.file_server.add_local_file_info(&mut media) {
            log::error!("cannot expose local media {}", media.media_id);
            return false;
        }
        self.client.notify_peer_load(&media)
    }

    pub fn play(&self, media: &MediaInfo) -> bool {
        let mut media = media.clone();
        if !self.file_server.add_local_file_info(&mut media) {
            log::error!("cannot expose local media {}", media.media_id);
            return false;
        }
        self.client.notify_peer_play(&media)
    }

    pub fn pause(&self) -> bool {
        self.client.notify_peer_pause()
    }

    pub fn resume(&self) -> bool {
        self.client.notify_peer_resume()
    }

    pub fn stop(&self) -> bool {
        self.client.notify_peer_stop()
    }

    pub fn next(&self) -> bool {
        self.client.notify_peer_next()
    }

    pub fn previous(&self) -> bool {
        self.client.notify_peer_previous()
    }

    pub fn seek(&self, position: i32) -> bool {
        if position < 0 {
            log::error!("invalid seek position {position}");
            return false;
        }
        self.client.notify_peer_seek(position)
    }

    pub fn fast_forward(&self, delta: i32) -> bool {
        if delta <= 0 {
            log::error!("invalid fast forward delta {delta}");
            return false;
        }
        self.client.notify_peer_fast_forward(delta)
    }

    pub fn fast_rewind(&self, delta: i32) -> bool {
        if delta <= 0 {
            log::error!("invalid fast rewind delta {delta}");
            return false;
        }
        self.client.notify_peer_fast_rewind(delta)
    }

    pub fn set_volume(&self, volume: i32) -> bool {
        if !(0..=CAST_STREAM_FULL_VOLUME).contains(&volume) {
            log::error!("invalid volume {volume}");
            return false;
        }
        self.client.notify_peer_set_volume(volume)
    }

    pub fn set_mute(&self, mute: bool) -> bool {
        self.client.notify_peer_set_mute(mute)
    }

    pub fn set_loop_mode(&self, mode: LoopMode) -> bool {
        self.client.notify_peer_set_repeat_mode(mode as i32)
    }

    pub fn set_speed(&self, speed: PlaybackSpeed) -> bool {
        self.client.notify_peer_set_speed(speed as i32)
    }

    pub fn player_status(&self) -> PlayerState {
        self.client.player_status()
    }

    pub fn position(&self) -> i32 {
        self.client.position()
    }

    pub fn duration(&self) -> i32 {
        self.client.duration()
    }

    pub fn volume(&self) -> i32 {
        self.client.volume()
    }

    pub fn max_volume(&self) -> i32 {
        self.client.max_volume()
    }

    pub fn mute(&self) -> bool {
        self.client.mute()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.client.loop_mode()
    }

    pub fn play_speed(&self) -> PlaybackSpeed {
        self.client.play_speed()
    }

    /// Release the exposed local files once the session ends.
    pub fn release(&self) {
        self.client.shutdown();
        self.file_server.clear_all_local_file_info();
    }
}
