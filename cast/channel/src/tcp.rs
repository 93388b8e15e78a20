use crate::codec::encode_frame;
use crate::{
    Channel, ChannelError, ChannelListener, ChannelRequest, Connection, ConnectionListener,
    FrameCodec, Result, INVALID_PORT,
};
use rtsp_types::{DeviceType, ModuleType};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

const SOCKET_SEND_BUFFER_SIZE: u32 = 512 * 1024;
const SOCKET_RECV_BUFFER_SIZE: u32 = 10 * 1024 * 1024;
const LISTEN_BACKLOG: u32 = 1024;

/// One TCP connection bound to a channel request.
///
/// The server path for the video module performs the dual accept: the
/// second accepted socket is wrapped into an owned sibling connection with
/// the module switched to audio. The peer port distinguishes the two only
/// when it differs from the expected remote video port.
pub struct TcpConnection {
    request: ChannelRequest,
    listener: parking_lot::Mutex<Option<Arc<dyn ChannelListener>>>,
    connection_listener: parking_lot::Mutex<Option<Arc<dyn ConnectionListener>>>,

    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    audio_sibling: parking_lot::Mutex<Option<Arc<TcpConnection>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,

    closed: AtomicBool,
}

impl TcpConnection {
    pub fn new(
        request: ChannelRequest,
        listener: Arc<dyn ChannelListener>,
        connection_listener: Arc<dyn ConnectionListener>,
    ) -> Arc<Self> {
        Arc::new(Self {
            request,
            listener: parking_lot::Mutex::new(Some(listener)),
            connection_listener: parking_lot::Mutex::new(Some(connection_listener)),
            writer: tokio::sync::Mutex::new(None),
            audio_sibling: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn connection_listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        self.connection_listener.lock().clone()
    }

    fn data_listener(&self) -> Option<Arc<dyn ChannelListener>> {
        self.listener.lock().clone()
    }

    fn configure_socket(&self) -> Result<TcpSocket> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.set_send_buffer_size(SOCKET_SEND_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUFFER_SIZE)?;
        socket.set_keepalive(true)?;
        Ok(socket)
    }

    fn local_bind_addr(&self) -> SocketAddr {
        let ip = self
            .request
            .local_device
            .ip_address
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = if self.request.local_port == INVALID_PORT {
            0
        } else {
            self.request.local_port as u16
        };
        SocketAddr::new(ip, port)
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.request.remote_device.ip_address.is_empty()
            || self.request.remote_port == INVALID_PORT
        {
            return Err(ChannelError::InvalidRequest);
        }

        let socket = self.configure_socket()?;
        socket.bind(self.local_bind_addr())?;

        let remote: SocketAddr = SocketAddr::new(
            self.request
                .remote_device
                .ip_address
                .parse()
                .map_err(|_| ChannelError::InvalidRequest)?,
            self.request.remote_port as u16,
        );
        let stream = socket.connect(remote).await?;

        let (read, write) = stream.into_split();
        *self.writer.lock().await = Some(write);

        if let Some(listener) = self.connection_listener() {
            listener.on_connection_opened(self.clone().channel());
        }
        if self.request.is_receiver {
            self.spawn_read_loop(read);
        }
        Ok(())
    }

    /// Accept loop of the listening side. `accepts` is 2 only for the
    /// video/audio dual-accept case; further peers are never accepted.
    async fn run_accept(self: Arc<Self>, listener: TcpListener, accepts: usize) {
        for _ in 0..accepts {
            match listener.accept().await {
                Ok((stream, peer)) => self.handle_accepted(stream, peer).await,
                Err(e) => {
                    log::error!("accept failed on {}: {e}", self.request.module_type);
                    if let Some(l) = self.connection_listener() {
                        l.on_connection_connect_failed(&self.request, INVALID_PORT);
                    }
                    return;
                }
            }
        }
    }

    async fn handle_accepted(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let is_audio = self.request.module_type == ModuleType::Video
            && i32::from(peer.port()) != self.request.remote_port
            && self.request.remote_device.device_type != DeviceType::HiCar;

        let target = if is_audio {
            log::debug!("accepted audio sibling from {peer}");
            self.make_audio_sibling()
        } else {
            log::debug!(
                "accepted {} connection from {peer}",
                self.request.module_type
            );
            self.clone()
        };

        let (read, write) = stream.into_split();
        *target.writer.lock().await = Some(write);

        if let Some(l) = target.connection_listener() {
            l.on_connection_opened(target.clone().channel());
        }
        if target.request.is_receiver {
            target.spawn_read_loop(read);
        }
    }

    fn make_audio_sibling(self: &Arc<Self>) -> Arc<TcpConnection> {
        let mut sibling = self.audio_sibling.lock();
        if let Some(existing) = sibling.as_ref() {
            return existing.clone();
        }

        let mut request = self.request.clone();
        request.module_type = ModuleType::Audio;

        let conn = Arc::new(TcpConnection {
            request,
            listener: parking_lot::Mutex::new(self.data_listener()),
            connection_listener: parking_lot::Mutex::new(self.connection_listener()),
            writer: tokio::sync::Mutex::new(None),
            audio_sibling: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        *sibling = Some(conn.clone());
        conn
    }

    fn spawn_task(&self, fut: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(fut));
    }

    fn spawn_read_loop(self: &Arc<Self>, read: OwnedReadHalf) {
        let this = self.clone();
        self.spawn_task(async move {
            let mut framed = FramedRead::new(read, FrameCodec::new(this.request.module_type));
            while let Some(item) = framed.next().await {
                match item {
                    Ok(frame) => {
                        if let Some(listener) = this.data_listener() {
                            listener.on_data_received(&frame);
                        }
                    }
                    Err(e) => {
                        log::error!("receive failed on {}: {e}", this.request.module_type);
                        if let Some(l) = this.connection_listener() {
                            l.on_connection_error(this.clone().channel(), INVALID_PORT);
                        }
                        return;
                    }
                }
            }
            log::debug!("receive loop of {} ended", this.request.module_type);
        });
    }
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    async fn start_connection(self: Arc<Self>) -> Result<i32> {
        tracing::debug!(module = %self.request.module_type, "tcp connect");
        if let Err(e) = self.connect().await {
            log::error!("tcp connect failed: {e}");
            if let Some(l) = self.connection_listener() {
                l.on_connection_connect_failed(&self.request, INVALID_PORT);
            }
            return Err(e);
        }
        Ok(self.request.local_port)
    }

    async fn start_listen(self: Arc<Self>) -> Result<i32> {
        tracing::debug!(module = %self.request.module_type, "tcp listen");
        let socket = self.configure_socket()?;
        socket.bind(self.local_bind_addr())?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let port = listener.local_addr()?.port();

        let accepts = if self.request.module_type == ModuleType::Video
            && self.request.remote_device.device_type != DeviceType::HiCar
        {
            2
        } else {
            1
        };

        let this = self.clone();
        self.spawn_task(this.run_accept(listener, accepts));

        Ok(i32::from(port))
    }

    async fn close(self: Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("closing tcp connection of {}", self.request.module_type);

        let sibling = self.audio_sibling.lock().take();
        if let Some(sibling) = sibling {
            // recursion depth is one: siblings never own siblings
            Box::pin(sibling.close()).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let listener = self.connection_listener.lock().take();
        if let Some(listener) = listener {
            listener.on_connection_closed(self.clone().channel());
        }
    }

    fn channel(self: Arc<Self>) -> Arc<dyn Channel> {
        self
    }

    fn request(&self) -> &ChannelRequest {
        &self.request
    }
}

#[async_trait::async_trait]
impl Channel for TcpConnection {
    fn request(&self) -> &ChannelRequest {
        &self.request
    }

    async fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            log::error!("refusing to send empty frame");
            return false;
        }
        let frame = encode_frame(data);

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            log::error!("send on unconnected {} channel", self.request.module_type);
            return false;
        };
        match writer.write_all(&frame).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("send failed on {}: {e}", self.request.module_type);
                false
            }
        }
    }
}
