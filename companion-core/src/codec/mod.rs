//! `tokio_util` codecs for the two wire formats.
//!
//! - [`CallCodec`]: fixed-header call frames on the primary connection.
//! - [`ChannelCodec`]: length-delimited JSON messages on the secondary channel.

mod channel;

pub use channel::{ChannelCodec, MAX_CHANNEL_MESSAGE};

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CompanionError;
use crate::frame::{Frame, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
use crate::header::{FrameHeader, FrameHeaderBytes, HEADER_LENGTH};

#[derive(Debug, Default, Clone, Copy)]
pub struct CallCodec;

impl CallCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for CallCodec {
    type Item = Frame;
    type Error = CompanionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() > MAX_FRAME_SIZE {
            return Err(CompanionError::FrameTooLarge {
                size: src.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let mut header_bytes: FrameHeaderBytes = [0; HEADER_LENGTH];
        header_bytes.copy_from_slice(&src[..HEADER_LENGTH]);
        let header = FrameHeader::from_bytes(&header_bytes)?;

        let payload_length = header.payload_length() as usize;
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(CompanionError::PayloadTooLarge {
                size: payload_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = HEADER_LENGTH + payload_length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let bytes = src.split_to(total);
        Frame::from_bytes(&bytes).map(Some)
    }
}

impl Encoder<Frame> for CallCodec {
    type Error = CompanionError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.encoded_len());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.payload().chunk());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FrameKind;

    #[test]
    fn decodes_split_and_coalesced_frames() {
        let mut codec = CallCodec::new();
        let mut buf = BytesMut::new();

        let first = Frame::request(1, &b"abc"[..]).unwrap();
        let second = Frame::half_close(1);
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        // Feed the first frame one byte short.
        let mut partial = buf.split_to(first.encoded_len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), first);
        let next = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(next.kind(), FrameKind::HalfClose);
        assert!(partial.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        let mut codec = CallCodec::new();
        let mut buf = BytesMut::from(&[0u8; HEADER_LENGTH][..]);
        assert!(matches!(codec.decode(&mut buf), Err(CompanionError::InvalidMagic)));
    }

    #[test]
    fn rejects_oversized_buffer() {
        let mut codec = CallCodec::new();
        let mut buf = BytesMut::from(&vec![0u8; MAX_FRAME_SIZE + 1][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CompanionError::FrameTooLarge { .. })
        ));
    }
}
