use crate::ChannelError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rtsp_types::ModuleType;
use tokio_util::codec::{Decoder, Encoder};

/// 4-byte big-endian length prefix.
pub const PACKET_HEADER_LEN: usize = 4;

/// Frames whose declared payload exceeds this are rejected.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Remote-control frames mask the declared length with this before the
/// header length is subtracted.
const CONTROL_LENGTH_MASK: u32 = 0xFFFF;

/// Length-prefixed frame codec of the TCP link.
///
/// Every payload is preceded by a 4-byte big-endian length. The
/// remote-control module is special: the parsed length is masked with
/// `0xFFFF` minus the header, and the header itself stays inside the
/// delivered buffer. All other modules receive the payload only.
pub struct FrameCodec {
    module: ModuleType,
    /// Bytes still needed for the current frame (`None` while reading the
    /// header).
    pending: Option<(usize, usize)>,
}

impl FrameCodec {
    pub fn new(module: ModuleType) -> Self {
        Self {
            module,
            pending: None,
        }
    }

    /// `(skip, take)` of the frame body for a declared length.
    fn frame_extent(&self, declared: u32) -> Result<(usize, usize), ChannelError> {
        if self.module == ModuleType::RemoteControl {
            let masked = declared & CONTROL_LENGTH_MASK;
            let Some(data_len) = (masked as usize).checked_sub(PACKET_HEADER_LEN) else {
                return Err(ChannelError::MalformedFrame);
            };
            if data_len > MAX_FRAME_SIZE {
                return Err(ChannelError::FrameTooLarge);
            }
            // header is kept inside the delivered buffer
            Ok((0, PACKET_HEADER_LEN + data_len))
        } else {
            let data_len = declared as usize;
            if data_len > MAX_FRAME_SIZE {
                return Err(ChannelError::FrameTooLarge);
            }
            Ok((PACKET_HEADER_LEN, data_len))
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ChannelError> {
        let (skip, take) = match self.pending {
            Some(extent) => extent,
            None => {
                if src.len() < PACKET_HEADER_LEN {
                    return Ok(None);
                }
                let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
                let extent = self.frame_extent(declared)?;
                self.pending = Some(extent);
                extent
            }
        };

        if src.len() < skip + take {
            src.reserve(skip + take - src.len());
            return Ok(None);
        }

        src.advance(skip);
        let frame = src.split_to(take).freeze();
        self.pending = None;

        Ok(Some(frame))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), ChannelError> {
        dst.reserve(PACKET_HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(item);
        Ok(())
    }
}

/// Frame one payload the way [`FrameCodec`] sends it: header and payload in
/// a single buffer so the transport issues one write.
pub(crate) fn encode_frame(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf
}

#[cfg(test)]
mod test {
    use super::*;

    fn feed(codec: &mut FrameCodec, bytes: &[u8]) -> Result<Option<Bytes>, ChannelError> {
        let mut src = BytesMut::from(bytes);
        codec.decode(&mut src)
    }

    #[test]
    fn round_trip() {
        let mut codec = FrameCodec::new(ModuleType::Rtsp);

        let mut wire = BytesMut::new();
        codec.encode(b"hello cast".as_slice(), &mut wire).unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 10]);

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello cast");
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let mut codec = FrameCodec::new(ModuleType::Rtsp);
        let mut src = BytesMut::from(&[0u8, 0, 0, 4, b'a', b'b'][..]);

        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"cd");
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"abcd");
    }

    #[test]
    fn frame_size_boundary() {
        let mut codec = FrameCodec::new(ModuleType::Video);

        // exactly 10 MiB is accepted
        let declared = (MAX_FRAME_SIZE as u32).to_be_bytes();
        assert!(feed(&mut codec, &declared).unwrap().is_none());

        // one byte more is rejected
        let mut codec = FrameCodec::new(ModuleType::Video);
        let declared = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        assert!(matches!(
            feed(&mut codec, &declared),
            Err(ChannelError::FrameTooLarge)
        ));
    }

    #[test]
    fn remote_control_keeps_header() {
        let mut codec = FrameCodec::new(ModuleType::RemoteControl);

        // declared length covers header + 3 payload bytes, upper bits noise
        let declared: u32 = 0x0005_0000 | 7;
        let mut wire = BytesMut::new();
        wire.put_u32(declared);
        wire.put_slice(b"xyz");

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.len(), PACKET_HEADER_LEN + 3);
        assert_eq!(&frame[PACKET_HEADER_LEN..], b"xyz");
        assert_eq!(&frame[..PACKET_HEADER_LEN], declared.to_be_bytes());
    }
}
