//! Parsing of the `GET`-only HTTP/1.1 subset the file channel speaks.

use std::collections::HashMap;

pub(crate) const INVALID_END_POS: i64 = -1;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub range_start: i64,
    pub range_end: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub status_code: String,
    pub content_length: i64,
    pub range_start: i64,
    pub range_end: i64,
    pub range_total: i64,
    pub file_id: String,
    /// Offset of the payload behind the header block.
    pub data_offset: usize,
}

/// Split the header block off `buffer`, tolerating `\n\n` in place of
/// `\r\n\r\n`. Returns the header lines and the payload offset.
fn split_header(buffer: &[u8]) -> Option<(Vec<String>, usize)> {
    let text = std::str::from_utf8(buffer).ok()?;

    let (head, data_offset) = if let Some(pos) = text.find("\r\n\r\n") {
        (&text[..pos], pos + 4)
    } else if let Some(pos) = text.find("\n\n") {
        (&text[..pos], pos + 2)
    } else {
        log::error!("no http header terminator");
        return None;
    };

    let lines: Vec<String> = head
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();
    if lines.len() < 2 {
        log::error!("http header too short, {} lines", lines.len());
        return None;
    }
    Some((lines, data_offset))
}

fn header_map(lines: &[String]) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in &lines[1..] {
        // split on ": "; a bare ":" prefix would be an http/2 pseudo header
        if let Some((name, value)) = line.split_once(": ") {
            headers.insert(name.to_string(), value.trim().to_string());
        }
    }
    headers
}

/// `Range: bytes=<start>-` or `Range: bytes=<start>-<end>`; multipart
/// ranges are not supported.
fn parse_range(range: &str) -> Option<(i64, i64)> {
    let spec = range.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;

    let start: i64 = start.parse().ok()?;
    if start <= INVALID_END_POS {
        return None;
    }
    if end.is_empty() {
        return Some((start, INVALID_END_POS));
    }
    let end: i64 = end.parse().ok()?;
    Some((start, end))
}

/// `Content-Range: bytes <start>-<end>/<total>`.
fn parse_content_range(value: &str) -> Option<(i64, i64, i64)> {
    let spec = value.trim().strip_prefix("bytes ")?;
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    Some((
        start.parse().ok()?,
        end.parse().unwrap_or(INVALID_END_POS),
        total.parse().unwrap_or(INVALID_END_POS),
    ))
}

/// `Content-Disposition: attachment; filename=<id>`.
fn parse_disposition(value: &str) -> Option<String> {
    let pos = value.find("filename")?;
    let rest = &value[pos..];
    let (_, name) = rest.split_once('=')?;
    let name = name.split(';').next().unwrap_or(name).trim();
    let name = name.trim_matches(|c| c == '"' || c == '\'');
    Some(name.to_string())
}

pub(crate) fn parse_http_request(buffer: &[u8]) -> Option<HttpRequest> {
    let (lines, _) = split_header(buffer)?;

    let mut request_line = lines[0].split(' ');
    let method = request_line.next()?.to_string();
    let uri = request_line.next()?.to_string();

    let headers = header_map(&lines);
    let (range_start, range_end) = parse_range(headers.get("Range")?)?;

    Some(HttpRequest {
        method,
        uri,
        range_start,
        range_end,
    })
}

pub(crate) fn parse_http_response(buffer: &[u8]) -> Option<HttpResponse> {
    let (lines, data_offset) = split_header(buffer)?;

    let mut status_line = lines[0].split(' ');
    let _protocol = status_line.next()?;
    let status_code = status_line.next()?.to_string();

    let headers = header_map(&lines);
    let content_length: i64 = headers.get("Content-Length")?.parse().ok()?;
    let (range_start, range_end, range_total) =
        parse_content_range(headers.get("Content-Range")?)?;
    let file_id = parse_disposition(headers.get("Content-Disposition")?)?;

    Some(HttpResponse {
        status_code,
        content_length,
        range_start,
        range_end,
        range_total,
        file_id,
        data_offset,
    })
}
