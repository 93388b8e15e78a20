use crate::json::{get_i32, get_i64, get_str};
use serde_json::{json, Value};

/// Sentinel url carried instead of the real one in dual-frame mode.
const DOUBLE_FRAME_URL: &str = "DOUBLE_FRAME";

/// One media item as transported over the stream bridge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub media_id: String,
    pub media_name: String,
    pub media_url: String,
    pub media_type: String,
    pub media_size: i64,
    pub start_position: i32,
    pub duration: i32,
    pub closing_credits_position: i32,
    pub album_cover_url: String,
    pub album_title: String,
    pub media_artist: String,
    pub lrc_url: String,
    pub lrc_content: String,
    pub app_icon_url: String,
    pub app_name: String,
}

/// A playlist plus its playback bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct MediaInfoHolder {
    pub current_index: i32,
    pub progress_refresh_interval: i32,
    pub media_info_list: Vec<MediaInfo>,
}

impl MediaInfo {
    /// Serialize for the wire. Dual-frame mode drops the album cover, lrc
    /// and app icon fields.
    pub(crate) fn encap(&self, is_double_frame: bool) -> Value {
        let mut data = json!({
            "MEDIA_ID": self.media_id,
            "MEDIA_NAME": self.media_name,
            "MEDIA_URL": self.media_url,
            "MEDIA_TYPE": self.media_type,
            "MEDIA_SIZE": self.media_size,
            "START_POSITION": self.start_position,
            "DURATION": self.duration,
            "CLOSING_CREDITS_POSITION": self.closing_credits_position,
            "ALBUM_TITLE": self.album_title,
            "MEDIA_ARTIST": self.media_artist,
            "APP_NAME": self.app_name,
        });
        if !is_double_frame {
            data["ALBUM_COVER_URL"] = json!(self.album_cover_url);
            data["LRC_URL"] = json!(self.lrc_url);
            data["LRC_CONTENT"] = json!(self.lrc_content);
            data["APP_ICON_URL"] = json!(self.app_icon_url);
        }
        data
    }

    /// Parse from the wire; any missing or wrongly typed mandatory key
    /// fails the whole item.
    pub(crate) fn parse(data: &Value, is_double_frame: bool) -> Option<MediaInfo> {
        let mut media = MediaInfo {
            media_id: get_str(data, "MEDIA_ID")?,
            media_name: get_str(data, "MEDIA_NAME")?,
            media_type: get_str(data, "MEDIA_TYPE")?,
            album_title: get_str(data, "ALBUM_TITLE")?,
            media_artist: get_str(data, "MEDIA_ARTIST")?,
            app_name: get_str(data, "APP_NAME")?,
            ..Default::default()
        };

        if is_double_frame {
            media.media_url = DOUBLE_FRAME_URL.to_string();
        } else {
            media.media_url = get_str(data, "MEDIA_URL")?;
            media.media_size = get_i64(data, "MEDIA_SIZE")?;
            media.start_position = get_i32(data, "START_POSITION")?;
            media.duration = get_i32(data, "DURATION")?;
            media.closing_credits_position = get_i32(data, "CLOSING_CREDITS_POSITION")?;
            media.album_cover_url = get_str(data, "ALBUM_COVER_URL")?;
            media.lrc_content = get_str(data, "LRC_CONTENT")?;
            media.app_icon_url = get_str(data, "APP_ICON_URL")?;
            media.lrc_url = get_str(data, "LRC_URL")?;
        }
        Some(media)
    }
}

impl MediaInfoHolder {
    /// Parse a `load`/`play`/`onPlayRequest` body.
    pub(crate) fn parse(data: &Value, is_double_frame: bool) -> Option<MediaInfoHolder> {
        let mut holder = MediaInfoHolder {
            current_index: get_i32(data, "CURRENT_INDEX")?,
            progress_refresh_interval: get_i32(data, "PROGRESS_INTERVAL")?,
            media_info_list: Vec::new(),
        };

        let list = data.get("LIST")?.as_array()?;
        for info in list {
            holder
                .media_info_list
                .push(MediaInfo::parse(info, is_double_frame)?);
        }
        Some(holder)
    }

    /// Wrap one media item the way `load`/`play` carry it.
    pub(crate) fn encap_single(media: &MediaInfo, is_double_frame: bool) -> Value {
        json!({
            "CURRENT_INDEX": 0,
            "PROGRESS_INTERVAL": 0,
            "LIST": [media.encap(is_double_frame)],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> MediaInfo {
        MediaInfo {
            media_id: "a".into(),
            media_name: "t".into(),
            media_url: "http://x".into(),
            media_type: "VIDEO".into(),
            ..Default::default()
        }
    }

    #[test]
    fn round_trip() {
        let media = sample();
        let parsed = MediaInfo::parse(&media.encap(false), false).unwrap();
        assert_eq!(parsed, media);
    }

    #[test]
    fn double_frame_substitutes_url() {
        let media = sample();
        let value = media.encap(true);
        assert!(value.get("ALBUM_COVER_URL").is_none());
        assert!(value.get("LRC_URL").is_none());
        assert!(value.get("APP_ICON_URL").is_none());

        let parsed = MediaInfo::parse(&value, true).unwrap();
        assert_eq!(parsed.media_url, "DOUBLE_FRAME");
    }

    #[test]
    fn missing_key_fails() {
        let mut value = sample().encap(false);
        value.as_object_mut().unwrap().remove("MEDIA_URL");
        assert!(MediaInfo::parse(&value, false).is_none());
    }
}
