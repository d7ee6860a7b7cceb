//! Terminal call status: the small, stable vocabulary callers observe.
//!
//! Numeric codes follow the gRPC status table so a front-end speaking gRPC
//! can pass them through unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CompanionError;

// ── StatusCode ───────────────────────────────────────────────────

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    FailedPrecondition = 9,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
}

impl TryFrom<u32> for StatusCode {
    type Error = CompanionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::Cancelled),
            3 => Ok(StatusCode::InvalidArgument),
            4 => Ok(StatusCode::DeadlineExceeded),
            9 => Ok(StatusCode::FailedPrecondition),
            12 => Ok(StatusCode::Unimplemented),
            13 => Ok(StatusCode::Internal),
            14 => Ok(StatusCode::Unavailable),
            15 => Ok(StatusCode::DataLoss),
            _ => Err(CompanionError::UnknownVariant {
                type_name: "StatusCode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
        };
        f.write_str(name)
    }
}

// ── Status ───────────────────────────────────────────────────────

/// A terminal status: code plus message. Sent once at the end of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CompanionError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompanionError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_values_match_grpc() {
        assert_eq!(StatusCode::Cancelled as u32, 1);
        assert_eq!(StatusCode::FailedPrecondition as u32, 9);
        assert_eq!(StatusCode::DataLoss as u32, 15);
        assert_eq!(StatusCode::try_from(12).unwrap(), StatusCode::Unimplemented);
    }

    #[test]
    fn code_invalid() {
        assert!(StatusCode::try_from(2).is_err());
        assert!(StatusCode::try_from(99).is_err());
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::ok().to_string(), "OK");
        let s = Status::new(StatusCode::Unavailable, "no surface");
        assert_eq!(s.to_string(), "UNAVAILABLE: no surface");
    }

    #[test]
    fn status_bytes_survive_transport() {
        let s = Status::new(StatusCode::DeadlineExceeded, "too slow");
        let parsed = Status::from_bytes(&s.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, s);
        assert!(Status::from_bytes(&[0xFF]).is_err());
    }
}
