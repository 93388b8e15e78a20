//! The HTTP-like local-file channel.
//!
//! The source exposes its local media under base64 file ids; the sink pulls
//! byte ranges through a small `GET`-only HTTP/1.1 subset and feeds them
//! into a layered read-ahead cache.

mod client;
mod http;
mod server;
mod source;

pub use client::LocalFileChannelClient;
pub use server::LocalFileChannelServer;
pub use source::{LocalDataSource, SourceError};

pub(crate) use http::{parse_http_request, parse_http_response, HttpRequest, HttpResponse};

/// Consumer of ranged file bytes arriving on the channel. Returns `false`
/// when the file id is not ours so the next listener is tried.
pub trait DataListener: Send + Sync {
    fn on_bytes_received(&self, file_id: &str, data: &[u8], offset: i64) -> bool;
}

/// `true` for urls the file channel serves: absolute paths and bare fd
/// digit strings. Remote (`http...`) urls stay untouched.
pub fn is_local_url(url: &str) -> bool {
    if url.is_empty() || url.starts_with("http") {
        return false;
    }
    is_local_file(url) || url.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_local_file(url: &str) -> bool {
    url.len() > 1 && url.starts_with('/')
}

/// Parse a bare fd digit string.
pub fn convert_file_id(file_id: &str) -> Option<i32> {
    if file_id.is_empty() {
        return None;
    }
    file_id.parse::<i32>().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_classification() {
        assert!(is_local_url("/data/media/movie.mp4"));
        assert!(is_local_url("42"));
        assert!(!is_local_url("http://example.com/movie.mp4"));
        assert!(!is_local_url("https://example.com/movie.mp4"));
        assert!(!is_local_url(""));
        assert!(!is_local_url("not-a-path"));
    }

    #[test]
    fn fd_conversion() {
        assert_eq!(convert_file_id("42"), Some(42));
        assert_eq!(convert_file_id("4x2"), None);
        assert_eq!(convert_file_id(""), None);
    }
}
