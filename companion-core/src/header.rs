//! Fixed-size call frame header.
//!
//! ```text
//!  0      4          8       12          16          24            32
//!  ┌──────┬──────────┬───────┬───────────┬───────────┬─────────────┐
//!  │ IDB0 │ checksum │ kind  │ operation │  call_id  │ payload_len │
//!  └──────┴──────────┴───────┴───────────┴───────────┴─────────────┘
//! ```
//!
//! All fields little-endian.

use crate::error::CompanionError;

pub const MAGIC: [u8; 4] = *b"IDB0";
pub const HEADER_LENGTH: usize = 32;

pub type FrameHeaderBytes = [u8; HEADER_LENGTH];

/// Frame kinds carried on a call connection.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Client starts a call for `operation` under `call_id`.
    Open = 1,
    /// One request message.
    Request = 2,
    /// Client finished sending requests.
    HalfClose = 3,
    /// Client abandons the call.
    Cancel = 4,
    /// One response message.
    Response = 5,
    /// Terminal status of a call; payload is an encoded `Status`.
    Status = 6,
    Heartbeat = 7,
}

impl TryFrom<u32> for FrameKind {
    type Error = CompanionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Open),
            2 => Ok(Self::Request),
            3 => Ok(Self::HalfClose),
            4 => Ok(Self::Cancel),
            5 => Ok(Self::Response),
            6 => Ok(Self::Status),
            7 => Ok(Self::Heartbeat),
            _ => Err(CompanionError::UnknownVariant {
                type_name: "FrameKind",
                value: value as u64,
            }),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    checksum: u32,
    kind: FrameKind,
    operation: u32,
    call_id: u64,
    payload_length: u64,
}

impl FrameHeader {
    pub fn new(
        checksum: u32,
        kind: FrameKind,
        operation: u32,
        call_id: u64,
        payload_length: u64,
    ) -> Self {
        Self {
            checksum,
            kind,
            operation,
            call_id,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[8..12].copy_from_slice(&(self.kind as u32).to_le_bytes());
        bytes[12..16].copy_from_slice(&self.operation.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.call_id.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.payload_length.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &FrameHeaderBytes) -> Result<Self, CompanionError> {
        if bytes[0..4] != MAGIC {
            return Err(CompanionError::InvalidMagic);
        }
        Ok(Self {
            checksum: read_u32(bytes, 4),
            kind: FrameKind::try_from(read_u32(bytes, 8))?,
            operation: read_u32(bytes, 12),
            call_id: read_u64(bytes, 16),
            payload_length: read_u64(bytes, 24),
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Raw operation id; only meaningful on `Open` frames.
    pub fn operation(&self) -> u32 {
        self.operation
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }
}

fn read_u32(bytes: &FrameHeaderBytes, at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(bytes: &FrameHeaderBytes, at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("kind", &self.kind)
            .field("operation", &format_args!("{:#06x}", self.operation))
            .field("call_id", &self.call_id)
            .field("payload_length", &self.payload_length)
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .finish()
    }
}
