use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::CompanionError;
use crate::handoff::ChannelMessage;

/// Largest secondary-channel message accepted (64 KiB).
pub const MAX_CHANNEL_MESSAGE: usize = 64 * 1024;

/// JSON [`ChannelMessage`]s behind a 4-byte big-endian length prefix.
#[derive(Debug)]
pub struct ChannelCodec {
    framing: LengthDelimitedCodec,
}

impl ChannelCodec {
    pub fn new() -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_CHANNEL_MESSAGE)
                .new_codec(),
        }
    }
}

impl Default for ChannelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChannelCodec {
    type Item = ChannelMessage;
    type Error = CompanionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing.decode(src)? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<ChannelMessage> for ChannelCodec {
    type Error = CompanionError;

    fn encode(&mut self, item: ChannelMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        self.framing.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_through_codec() {
        let mut codec = ChannelCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(ChannelMessage::status("received"), &mut buf).unwrap();
        assert_eq!(&buf[..4], &((buf.len() - 4) as u32).to_be_bytes());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.get_string("status"), Some("received"));
    }

    #[test]
    fn non_json_body_is_an_encoding_error() {
        let mut codec = ChannelCodec::new();
        let mut buf = BytesMut::new();
        LengthDelimitedCodec::new()
            .encode(Bytes::from_static(b"not json"), &mut buf)
            .unwrap();
        assert!(matches!(codec.decode(&mut buf), Err(CompanionError::Encoding(_))));
    }
}
