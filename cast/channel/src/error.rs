use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request is invalid")]
    InvalidRequest,
    #[error("a connection for this request already exists")]
    DuplicateRequest,
    #[error("connection is not established")]
    NotConnected,
    #[error("received frame exceeds the 10 MiB limit")]
    FrameTooLarge,
    #[error("received frame is malformed")]
    MalformedFrame,
    #[error("bus registry is not initialized")]
    BusNotInitialized,
    #[error("bus session setup failed with code {0}")]
    BusSetupFailed(i32),
    #[error(transparent)]
    Io(#[from] io::Error),
}
