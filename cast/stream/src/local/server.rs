use super::{convert_file_id, is_local_file, is_local_url, parse_http_request};
use crate::MediaInfo;
use base64::Engine;
use channel::{Channel, ChannelListener};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One send is limited to 2 MiB by the transport; 1 KiB is reserved for the
/// http header.
const MAX_READ_LEN: i64 = 2 * 1024 * 1024 - 1024;

struct LocalFileInfo {
    file: File,
    file_len: i64,
}

/// Source side of the local-file channel.
///
/// Local media urls are rewritten to base64 file ids before they cross the
/// wire; the sink then pulls byte ranges by id. Files stay open until
/// [`LocalFileChannelServer::clear_all_local_file_info`] or drop.
pub struct LocalFileChannelServer {
    channel: Mutex<Option<Arc<dyn Channel>>>,
    file_map: Mutex<HashMap<String, LocalFileInfo>>,
    request_tx: mpsc::UnboundedSender<Vec<u8>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalFileChannelServer {
    pub fn new() -> Arc<Self> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let server = Arc::new(Self {
            channel: Mutex::new(None),
            file_map: Mutex::new(HashMap::new()),
            request_tx,
            worker: Mutex::new(None),
        });

        let worker_server = Arc::downgrade(&server);
        *server.worker.lock() = Some(tokio::spawn(async move {
            while let Some(buffer) = request_rx.recv().await {
                let Some(server) = worker_server.upgrade() else {
                    return;
                };
                server.process_request_data(&buffer).await;
            }
        }));

        server
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.lock() = Some(channel);
    }

    pub fn remove_channel(&self) {
        *self.channel.lock() = None;
    }

    /// Rewrite a local url (path or fd digits) into its wire form and
    /// resolve the media size. Remote urls pass through untouched.
    pub fn add_local_file_info(&self, media: &mut MediaInfo) -> bool {
        if !is_local_url(&media.media_url) {
            log::debug!("skipping remote url");
            return true;
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.media_url);

        let mut file = if is_local_file(&media.media_url) {
            match File::open(&media.media_url) {
                Ok(file) => file,
                Err(e) => {
                    log::error!("cannot open media file: {e}");
                    return false;
                }
            }
        } else {
            let Some(fd) = convert_file_id(&media.media_url) else {
                log::error!("invalid fd url");
                return false;
            };
            // the fd was handed over by the caller and is owned from here on
            unsafe {
                use std::os::fd::FromRawFd;
                File::from_raw_fd(fd)
            }
        };

        let file_len = match file.seek(SeekFrom::End(0)) {
            Ok(len) => len as i64,
            Err(e) => {
                log::error!("cannot resolve media length: {e}");
                return false;
            }
        };
        log::debug!("encoded id {encoded}, length {file_len}");

        self.file_map
            .lock()
            .insert(encoded.clone(), LocalFileInfo { file, file_len });

        media.media_url = encoded;
        media.media_size = file_len;
        true
    }

    pub fn clear_all_local_file_info(&self) {
        self.file_map.lock().clear();
    }

    fn find_file_length(&self, uri: &str) -> i64 {
        self.file_map.lock().get(uri).map(|f| f.file_len).unwrap_or(0)
    }

    async fn process_request_data(&self, buffer: &[u8]) {
        let Some(request) = parse_http_request(buffer) else {
            log::error!("invalid file request header");
            return;
        };
        if request.method != "GET" {
            log::error!("unsupported file request method {}", request.method);
            return;
        }

        self.response_file_request(&request.uri, request.range_start, request.range_end)
            .await;
    }

    async fn response_file_request(&self, uri: &str, start: i64, end: i64) {
        log::debug!("file request {uri} range {start}-{end}");
        if uri.is_empty() {
            return;
        }
        let file_len = self.find_file_length(uri);
        if file_len <= 0 {
            log::error!("unknown file id {uri}");
            return;
        }

        if start == 0 && end == 0 {
            self.response_file_length_request(uri, file_len).await;
        } else {
            self.response_file_data_request(uri, file_len, start, end).await;
        }
    }

    /// Length probe: a header-only 200 whose `Content-Range` carries the
    /// total file length.
    async fn response_file_length_request(&self, uri: &str, file_len: i64) {
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Accept-Ranges: bytes\r\n\
             Content-Length: 0\r\n\
             Content-Range: bytes 0-0/{file_len}\r\n\
             Content-Disposition: attachment; filename={uri}\r\n\r\n"
        );
        log::info!("file length probe for {uri}: {file_len}");
        self.send_data(response.into_bytes()).await;
    }

    async fn response_file_data_request(&self, uri: &str, file_len: i64, start: i64, end: i64) {
        let mut new_end = end;
        if new_end <= 0 {
            new_end = file_len;
        }
        new_end = file_len.min(new_end.min(start + MAX_READ_LEN));
        if new_end <= start {
            log::error!("invalid range {start}-{new_end}");
            return;
        }
        let send_len = (new_end - start) as usize;

        let header = format!(
            "HTTP/1.1 200 OK\r\n\
             Accept-Ranges: bytes\r\n\
             Content-Length: {send_len}\r\n\
             Content-Range: bytes {start}-{new_end}/{file_len}\r\n\
             Content-Disposition: attachment; filename={uri}\r\n\r\n"
        );

        let mut buffer = Vec::with_capacity(header.len() + send_len);
        buffer.extend_from_slice(header.as_bytes());
        buffer.resize(header.len() + send_len, 0);

        let read = {
            let map = self.file_map.lock();
            let Some(info) = map.get(uri) else {
                return;
            };
            Self::read_file_data(&info.file, start, &mut buffer[header.len()..])
        };
        if read == 0 {
            log::error!("reading {send_len} bytes at {start} failed");
            return;
        }
        buffer.truncate(header.len() + read);

        self.send_data(buffer).await;
        log::debug!("sent {read} bytes at {start}");
    }

    #[cfg(unix)]
    fn read_file_data(file: &File, start: i64, buffer: &mut [u8]) -> usize {
        use std::os::unix::fs::FileExt;

        let mut total = 0;
        while total < buffer.len() {
            match file.read_at(&mut buffer[total..], start as u64 + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    log::error!("file read failed: {e}");
                    break;
                }
            }
        }
        total
    }

    async fn send_data(&self, buffer: Vec<u8>) {
        let channel = self.channel.lock().clone();
        let Some(channel) = channel else {
            log::error!("file channel is not created");
            return;
        };
        channel.send(&buffer).await;
    }
}

impl ChannelListener for LocalFileChannelServer {
    fn on_data_received(&self, data: &[u8]) {
        if data.is_empty() {
            log::error!("empty file request");
            return;
        }
        if self.request_tx.send(data.to_vec()).is_err() {
            log::error!("file request worker is gone");
        }
    }
}

impl Drop for LocalFileChannelServer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        self.clear_all_local_file_info();
    }
}
