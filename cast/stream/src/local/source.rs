use super::{DataListener, LocalFileChannelClient};
use parking_lot::Mutex;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

const MAX_CACHE_COUNT: usize = 4; // total cache: 4 * 5 = 20MB
const MAX_BUFFER_SIZE: i64 = 5 * 1024 * 1024;
const PAUSE_REQUEST_WATER_LINE: i64 = 4 * 1024 * 1024;
const SINGLE_REQUEST_MAX_SIZE: i64 = 2 * 1024 * 1024;
const FIRST_REQUEST_SIZE: i64 = 1024 * 1024;
const WAIT_DATA_TIMEOUT_MS: u64 = 100;
const REQUEST_RETRY_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("read past end of file")]
    Eof,
    #[error("source io error")]
    Io,
}

enum NeedRequest {
    No,
    /// Request `[start, end)` into this cache.
    InCurrent(i64, i64),
    /// This cache is full; redirect the request at `start` into another.
    InNext(i64),
}

struct CacheInner {
    buffer: Vec<u8>,
    start_pos: i64,
    curr_pos: i64,
    end_pos: i64,
    /// Tail of the outstanding request; equals `end_pos` while idle.
    next_end_pos: i64,
    last_used: Instant,
    last_request: Instant,
}

/// A contiguous byte window of the remote file plus its read-ahead state.
struct Cache {
    inner: Mutex<CacheInner>,
    data_ready: Notify,
}

impl Cache {
    fn new(pos: i64) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(CacheInner {
                buffer: vec![0u8; MAX_BUFFER_SIZE as usize],
                start_pos: pos,
                curr_pos: pos,
                end_pos: pos,
                next_end_pos: pos,
                last_used: now,
                last_request: now,
            }),
            data_ready: Notify::new(),
        }
    }

    fn reset(&self, pos: i64) {
        let mut inner = self.inner.lock();
        inner.start_pos = pos;
        inner.curr_pos = pos;
        inner.end_pos = pos;
        inner.next_end_pos = pos;
        inner.last_used = Instant::now();
    }

    /// Whether `pos` falls into the window (including the requested tail).
    /// A hit refreshes the LRU timestamp.
    fn is_match(&self, pos: i64) -> bool {
        let mut inner = self.inner.lock();
        if pos < inner.start_pos || pos >= inner.next_end_pos {
            return false;
        }
        inner.last_used = Instant::now();
        true
    }

    fn used_time(&self) -> Instant {
        self.inner.lock().last_used
    }

    fn need_request(&self) -> NeedRequest {
        let mut inner = self.inner.lock();
        let cached = inner.end_pos - inner.start_pos;

        // already requested, or enough data ahead of the reader
        if inner.next_end_pos != inner.end_pos
            || (inner.end_pos - inner.curr_pos) >= PAUSE_REQUEST_WATER_LINE
        {
            return NeedRequest::No;
        }
        if MAX_BUFFER_SIZE <= cached {
            return NeedRequest::InNext(inner.end_pos);
        }

        let mut length = (MAX_BUFFER_SIZE - cached).min(SINGLE_REQUEST_MAX_SIZE);
        if inner.start_pos == inner.end_pos {
            length = FIRST_REQUEST_SIZE;
        }
        let start = inner.end_pos;
        let end = start + length;
        inner.next_end_pos = end;
        inner.last_request = Instant::now();
        NeedRequest::InCurrent(start, end)
    }

    /// Copy out up to `data.len()` bytes at `pos`, waiting briefly when the
    /// window has not been filled yet. A stale outstanding request is reset
    /// so the next read retries it.
    async fn read(&self, data: &mut [u8], pos: i64) -> usize {
        if data.is_empty() {
            return 0;
        }

        {
            let inner = self.inner.lock();
            if pos >= inner.next_end_pos || pos < inner.start_pos {
                log::error!(
                    "no data expected at {pos}, window {}..{}",
                    inner.start_pos,
                    inner.next_end_pos
                );
                return 0;
            }
        }

        loop {
            let mut inner = self.inner.lock();
            inner.last_used = Instant::now();

            if pos < inner.end_pos {
                let available = (inner.end_pos - pos) as usize;
                let read = data.len().min(available);
                let offset = (pos - inner.start_pos) as usize;
                data[..read].copy_from_slice(&inner.buffer[offset..offset + read]);
                inner.curr_pos = pos;
                drop(inner);
                self.data_ready.notify_waiters();
                return read;
            }

            // data request is in flight, wait for the server
            let mut notified = pin!(self.data_ready.notified());
            notified.as_mut().enable();
            drop(inner);

            if tokio::time::timeout(Duration::from_millis(WAIT_DATA_TIMEOUT_MS), notified)
                .await
                .is_err()
            {
                let mut inner = self.inner.lock();
                if pos >= inner.end_pos {
                    log::error!("waiting for data at {pos} timed out");
                    if inner.last_request.elapsed() >= REQUEST_RETRY_INTERVAL {
                        // force a re-request
                        inner.next_end_pos = inner.end_pos;
                    }
                    return 0;
                }
            }
        }
    }

    /// Append `data` at `offset`; only accepted when it continues the
    /// window exactly.
    fn write(&self, data: &[u8], offset: i64) -> bool {
        let mut inner = self.inner.lock();
        if offset != inner.end_pos {
            return false;
        }
        let remain = MAX_BUFFER_SIZE - (inner.end_pos - inner.start_pos);
        if remain <= 0 || data.is_empty() {
            log::error!("no room for {} bytes at {offset}", data.len());
            return false;
        }
        let write = (data.len() as i64).min(remain) as usize;
        let at = (inner.end_pos - inner.start_pos) as usize;
        inner.buffer[at..at + write].copy_from_slice(&data[..write]);
        inner.end_pos += write as i64;
        inner.next_end_pos = inner.end_pos;
        drop(inner);
        self.data_ready.notify_waiters();
        true
    }
}

/// Pull-based data source over the local-file channel.
///
/// Owns up to four 5 MiB caches chosen by LRU; reads ahead in 2 MiB steps
/// (1 MiB for a fresh cache) whenever the available tail drops under 4 MiB.
pub struct LocalDataSource {
    file_id: String,
    file_length: Mutex<i64>,
    channel_client: Arc<LocalFileChannelClient>,
    caches: Mutex<Vec<Arc<Cache>>>,
}

impl LocalDataSource {
    pub fn new(
        file_id: &str,
        file_length: i64,
        channel_client: Arc<LocalFileChannelClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            file_id: file_id.to_string(),
            file_length: Mutex::new(file_length),
            channel_client,
            caches: Mutex::new(Vec::new()),
        })
    }

    /// Register with the channel and ask the peer for the file channel.
    pub fn start(self: &Arc<Self>) -> bool {
        self.channel_client
            .add_data_listener(self.clone() as Arc<dyn DataListener>);
        self.channel_client.notify_create_channel();
        true
    }

    pub fn stop(self: &Arc<Self>) -> bool {
        let listener = self.clone() as Arc<dyn DataListener>;
        self.channel_client.remove_data_listener(&listener);
        true
    }

    pub fn size(&self) -> i64 {
        let mut length = self.file_length.lock();
        if *length > 0 {
            return *length;
        }
        *length = self.channel_client.request_file_length(&self.file_id);
        *length
    }

    fn best_cache(&self, pos: i64) -> Arc<Cache> {
        let mut caches = self.caches.lock();
        if let Some(hit) = caches.iter().find(|c| c.is_match(pos)) {
            return hit.clone();
        }
        if caches.len() < MAX_CACHE_COUNT {
            let cache = Arc::new(Cache::new(pos));
            caches.push(cache.clone());
            return cache;
        }
        // all caches in use, recycle the least recently used window
        let lru = caches
            .iter()
            .min_by_key(|c| c.used_time())
            .expect("cache list is never empty here")
            .clone();
        log::debug!("resetting lru cache to {pos}");
        lru.reset(pos);
        lru
    }

    async fn solve_req_data(&self, cache: &Arc<Cache>) {
        let request = match cache.need_request() {
            NeedRequest::No => return,
            NeedRequest::InCurrent(start, end) => (start, end),
            NeedRequest::InNext(start) => {
                let next = self.best_cache(start);
                match next.need_request() {
                    NeedRequest::InCurrent(start, end) => (start, end),
                    _ => return,
                }
            }
        };
        log::debug!("read ahead {}..{}", request.0, request.1);
        self.channel_client
            .request_byte_data(request.0, request.1, &self.file_id)
            .await;
    }

    /// Read up to `data.len()` bytes at `pos`. Blocks the caller inside the
    /// cache for up to 100 ms when the bytes are still in flight.
    pub async fn read_at(&self, data: &mut [u8], pos: i64) -> Result<usize, SourceError> {
        let file_length = *self.file_length.lock();
        if pos >= file_length {
            log::error!("read at {pos} beyond end {file_length}");
            return Err(SourceError::Eof);
        }
        if pos < 0 {
            log::error!("no-seek mode is not supported");
            return Err(SourceError::Io);
        }

        self.channel_client.wait_create_channel().await;

        let cache = self.best_cache(pos);
        // a fresh cache has no data yet, request before reading
        self.solve_req_data(&cache).await;
        let read = cache.read(data, pos).await;
        // top the window back up for the next read
        self.solve_req_data(&cache).await;
        Ok(read)
    }
}

impl DataListener for LocalDataSource {
    fn on_bytes_received(&self, file_id: &str, data: &[u8], offset: i64) -> bool {
        if file_id != self.file_id {
            log::debug!("file id {file_id} is not ours");
            return false;
        }
        let caches = self.caches.lock().clone();
        for cache in caches {
            if cache.write(data, offset) {
                return true;
            }
        }
        log::error!("no cache accepted {} bytes at {offset}", data.len());
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_read_after_write() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let cache = Cache::new(0);
            // mark bytes as requested so the read does not bail out early
            assert!(matches!(cache.need_request(), NeedRequest::InCurrent(0, end) if end == FIRST_REQUEST_SIZE));

            assert!(cache.write(b"abcdef", 0));
            let mut buf = [0u8; 4];
            assert_eq!(cache.read(&mut buf, 0).await, 4);
            assert_eq!(&buf, b"abcd");

            let mut buf = [0u8; 16];
            assert_eq!(cache.read(&mut buf, 4).await, 2);
            assert_eq!(&buf[..2], b"ef");
        });
    }

    #[test]
    fn write_requires_contiguous_offset() {
        let cache = Cache::new(100);
        assert!(!cache.write(b"xyz", 50));
        assert!(cache.write(b"xyz", 100));
        assert!(!cache.write(b"xyz", 200));
    }

    #[test]
    fn request_sizing_follows_watermarks() {
        let cache = Cache::new(0);

        // first request is 1 MiB
        let NeedRequest::InCurrent(start, end) = cache.need_request() else {
            panic!("expected a first request");
        };
        assert_eq!(start, 0);
        assert_eq!(end, FIRST_REQUEST_SIZE);

        // outstanding request suppresses further ones
        assert!(matches!(cache.need_request(), NeedRequest::No));

        // fill the first window, next request is 2 MiB
        let chunk = vec![0u8; FIRST_REQUEST_SIZE as usize];
        assert!(cache.write(&chunk, 0));
        let NeedRequest::InCurrent(start, end) = cache.need_request() else {
            panic!("expected a follow-up request");
        };
        assert_eq!(start, FIRST_REQUEST_SIZE);
        assert_eq!(end, FIRST_REQUEST_SIZE + SINGLE_REQUEST_MAX_SIZE);
    }

    #[test]
    fn full_cache_redirects_to_next() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let cache = Cache::new(0);
            let _ = cache.need_request();

            // fill to capacity in 1 MiB steps
            let chunk = vec![0u8; FIRST_REQUEST_SIZE as usize];
            for i in 0..5 {
                assert!(cache.write(&chunk, i * FIRST_REQUEST_SIZE));
            }

            // advance the reader so less than the watermark remains ahead
            let mut buf = [0u8; 1];
            assert_eq!(cache.read(&mut buf, MAX_BUFFER_SIZE - 512 * 1024).await, 1);

            assert!(matches!(
                cache.need_request(),
                NeedRequest::InNext(start) if start == MAX_BUFFER_SIZE
            ));
        });
    }
}
