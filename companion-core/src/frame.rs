//! Call frames: header plus payload, checksummed with blake3.

use bytes::Bytes;

use crate::error::CompanionError;
use crate::header::{FrameHeader, FrameHeaderBytes, FrameKind, HEADER_LENGTH};
use crate::operation::Operation;
use crate::status::Status;

/// Largest payload a single frame may carry (256 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;
/// Upper bound the decoder accepts before giving up on a connection.
pub const MAX_FRAME_SIZE: usize = 512 * 1024;

#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    fn build(
        kind: FrameKind,
        operation: u32,
        call_id: u64,
        payload: Bytes,
    ) -> Result<Self, CompanionError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CompanionError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = FrameHeader::new(
            checksum(&payload),
            kind,
            operation,
            call_id,
            payload.len() as u64,
        );
        Ok(Self { header, payload })
    }

    fn bare(kind: FrameKind, call_id: u64) -> Self {
        Self {
            header: FrameHeader::new(0, kind, 0, call_id, 0),
            payload: Bytes::new(),
        }
    }

    // ── Constructors ─────────────────────────────────────────────

    pub fn open(call_id: u64, operation: Operation) -> Self {
        Self {
            header: FrameHeader::new(0, FrameKind::Open, operation as u32, call_id, 0),
            payload: Bytes::new(),
        }
    }

    pub fn request(call_id: u64, payload: impl Into<Bytes>) -> Result<Self, CompanionError> {
        Self::build(FrameKind::Request, 0, call_id, payload.into())
    }

    pub fn half_close(call_id: u64) -> Self {
        Self::bare(FrameKind::HalfClose, call_id)
    }

    pub fn cancel(call_id: u64) -> Self {
        Self::bare(FrameKind::Cancel, call_id)
    }

    pub fn response(call_id: u64, payload: impl Into<Bytes>) -> Result<Self, CompanionError> {
        Self::build(FrameKind::Response, 0, call_id, payload.into())
    }

    pub fn status(call_id: u64, status: &Status) -> Result<Self, CompanionError> {
        Self::build(FrameKind::Status, 0, call_id, Bytes::from(status.to_bytes()?))
    }

    pub fn heartbeat() -> Self {
        Self::bare(FrameKind::Heartbeat, 0)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind()
    }

    pub fn call_id(&self) -> u64 {
        self.header.call_id()
    }

    /// Operation of an `Open` frame.
    pub fn operation(&self) -> Result<Operation, CompanionError> {
        Operation::try_from(self.header.operation())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Decode the payload of a `Status` frame.
    pub fn to_status(&self) -> Result<Status, CompanionError> {
        if self.kind() != FrameKind::Status {
            return Err(CompanionError::InvalidHeader("not a status frame"));
        }
        Status::from_bytes(&self.payload)
    }

    /// Whether the stored checksum matches the payload.
    pub fn validate(&self) -> bool {
        self.payload.is_empty() || self.header.checksum() == checksum(&self.payload)
    }

    // ── Wire ─────────────────────────────────────────────────────

    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTH + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompanionError> {
        let header_bytes: &FrameHeaderBytes = bytes
            .get(..HEADER_LENGTH)
            .and_then(|b| b.try_into().ok())
            .ok_or(CompanionError::InvalidHeader("frame shorter than header"))?;
        let header = FrameHeader::from_bytes(header_bytes)?;

        let payload_length = header.payload_length() as usize;
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(CompanionError::PayloadTooLarge {
                size: payload_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let expected = HEADER_LENGTH + payload_length;
        if bytes.len() != expected {
            return Err(CompanionError::InvalidFrameLength {
                expected,
                actual: bytes.len(),
            });
        }

        let frame = Self {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_LENGTH..]),
        };
        if !frame.validate() {
            return Err(CompanionError::ChecksumMismatch);
        }
        Ok(frame)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// First four bytes of the blake3 digest; zero for an empty payload.
pub fn checksum(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let digest = blake3::hash(payload);
    let mut word = [0u8; 4];
    word.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn request_frame_survives_the_wire() {
        let frame = Frame::request(3, &b"hello"[..]).unwrap();
        let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.kind(), FrameKind::Request);
        assert!(decoded.validate());
    }

    #[test]
    fn open_frame_carries_operation() {
        let frame = Frame::open(11, Operation::GetMainScreenSurface);
        let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded.operation().unwrap(), Operation::GetMainScreenSurface);
        assert_eq!(decoded.call_id(), 11);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut bytes = Frame::response(1, &b"payload"[..]).unwrap().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(Frame::from_bytes(&bytes), Err(CompanionError::ChecksumMismatch)));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            Frame::request(1, big),
            Err(CompanionError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn status_frame_decodes() {
        let status = Status::new(StatusCode::Unavailable, "No IOSurface available");
        let frame = Frame::status(4, &status).unwrap();
        assert_eq!(frame.to_status().unwrap(), status);
        assert!(Frame::heartbeat().to_status().is_err());
    }
}
