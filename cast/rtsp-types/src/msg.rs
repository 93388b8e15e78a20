//! Contains the control protocol message parser.

use crate::parse::parse_int;
use crate::{Method, INVALID_VALUE, STATUS_OK, STATUS_OK_STR};
use std::collections::HashMap;

/// Minimum useful line length, shorter lines are skipped.
const MIN_LINE_LENGTH: usize = 3;

/// A parsed control protocol message, either request or response.
///
/// Header names are lowercased and trimmed. Lines without a colon are
/// collected into [`RtspMessage::unmatched`] — `GET_PARAMETER` requests use
/// them to convey parameter keys without values.
///
/// ```
/// use castlink_rtsp_types::RtspMessage;
///
/// let msg = RtspMessage::parse("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\nRequire: com.huawei.hisight1.0\r\n");
///
/// assert!(!msg.is_response());
/// assert_eq!(msg.cseq(), 1);
/// assert_eq!(msg.header("require"), Some("com.huawei.hisight1.0"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RtspMessage {
    first_line: String,
    status_code: i32,
    headers: HashMap<String, String>,
    unmatched: String,
}

impl RtspMessage {
    /// Parse one message. Lines are separated by CRLF, bare LF is tolerated.
    pub fn parse(input: &str) -> Self {
        let mut msg = RtspMessage::default();

        let mut lines = input.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let Some(first_line) = lines.next() else {
            return msg;
        };
        msg.first_line = first_line.to_string();
        msg.status_code = if msg.first_line.contains(STATUS_OK_STR) {
            STATUS_OK
        } else {
            0
        };

        let mut unmatched = String::new();
        for line in lines {
            if line.len() <= MIN_LINE_LENGTH {
                continue;
            }

            match line.find(':') {
                None => unmatched.push_str(line.trim()),
                Some(pos) => {
                    let (name, value) = (&line[..pos], &line[pos + 1..]);
                    if name.is_empty() || value.is_empty() {
                        log::debug!("skipping malformed header line");
                        continue;
                    }
                    msg.headers
                        .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
        }
        msg.unmatched = unmatched;

        msg
    }

    /// The untouched leading line of the message.
    pub fn first_line(&self) -> &str {
        &self.first_line
    }

    /// `true` when the leading line starts with `RTSP/`.
    pub fn is_response(&self) -> bool {
        self.first_line.starts_with("RTSP/")
    }

    /// The method of a request line, `None` for responses.
    pub fn method(&self) -> Option<Method> {
        if self.is_response() {
            return None;
        }
        let (_, method) = Method::parse(&self.first_line).ok()?;
        Some(method)
    }

    /// 200 when the leading line carries `200 OK`, 0 otherwise.
    pub fn status_code(&self) -> i32 {
        self.status_code
    }

    /// Header lookup by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Concatenation of all colon-less line fragments.
    pub fn unmatched(&self) -> &str {
        &self.unmatched
    }

    /// The `CSeq` header: 0 when absent, -1 when malformed.
    pub fn cseq(&self) -> i32 {
        match self.header("cseq") {
            None => 0,
            Some(value) => parse_int(value).unwrap_or(INVALID_VALUE),
        }
    }
}

#[cfg(test)]
mod test {
    use super::RtspMessage;
    use crate::Method;

    #[test]
    fn parse_request() {
        let msg = RtspMessage::parse(
            "SET_PARAMETER rtsp://localhost/hisight1.0 RTSP/1.0\r\n\
             Date: 2024-01-01\r\n\
             Cseq: 7\r\n\
             Content-Type: text/parameters\r\n\
             his_trigger_method: SETUP\r\n\r\n",
        );

        assert!(!msg.is_response());
        assert_eq!(msg.method(), Some(Method::SET_PARAMETER));
        assert_eq!(msg.cseq(), 7);
        assert_eq!(msg.header("his_trigger_method"), Some("SETUP"));
        assert_eq!(msg.header("content-type"), Some("text/parameters"));
        assert_eq!(msg.status_code(), 0);
    }

    #[test]
    fn parse_response_with_status() {
        let msg = RtspMessage::parse("RTSP/1.0 200 OK\r\nCseq: 3\r\n\r\n");

        assert!(msg.is_response());
        assert_eq!(msg.status_code(), 200);
        assert_eq!(msg.method(), None);
        assert_eq!(msg.cseq(), 3);
    }

    #[test]
    fn keyless_lines_are_unmatched() {
        let msg = RtspMessage::parse(
            "GET_PARAMETER rtsp://localhost/hisight1.0 RTSP/1.0\r\n\
             Cseq: 4\r\n\r\n\
             his_version\r\nhis_video_formats\r\nhis_audio_formats\r\n",
        );

        assert!(msg.unmatched().contains("his_version"));
        assert!(msg.unmatched().contains("his_video_formats"));
        assert!(msg.unmatched().contains("his_audio_formats"));
    }

    #[test]
    fn tolerates_bare_newlines() {
        let msg = RtspMessage::parse("RTSP/1.0 200 OK\nCseq: 12\n\n");

        assert_eq!(msg.cseq(), 12);
        assert_eq!(msg.status_code(), 200);
    }

    #[test]
    fn missing_cseq_is_zero() {
        let msg = RtspMessage::parse("OPTIONS * RTSP/1.0\r\n\r\n");
        assert_eq!(msg.cseq(), 0);
    }
}
