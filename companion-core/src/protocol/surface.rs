//! Main-screen surface sharing (`get_main_screen_iosurface`).
//!
//! ```text
//! Client ──[Request]──────────────────────────► Companion
//!   Payload: MainScreenSurfaceRequest (bincode)
//!
//! Companion ──[sendSurface]── secondary channel ──► endpoint
//! Companion ◄─[status]─────── secondary channel ─── endpoint
//!
//! Companion ──[Response]──────────────────────► Client
//!   Payload: MainScreenSurfaceResponse (bincode)
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CompanionError, FailureDescriptor};

/// Ask the companion to hand the main-screen surface to `endpoint`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MainScreenSurfaceRequest {
    /// Name of the secondary endpoint that should receive the surface.
    pub endpoint: String,
}

impl MainScreenSurfaceRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CompanionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompanionError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Decode a request message; malformed input is the caller's fault.
    pub fn decode(bytes: &[u8]) -> Result<Self, FailureDescriptor> {
        Self::from_bytes(bytes).map_err(|e| {
            FailureDescriptor::invalid_argument(format!(
                "Invalid argument: malformed surface request: {e}"
            ))
        })
    }
}

/// The endpoint's acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MainScreenSurfaceResponse {
    pub status: String,
}

impl MainScreenSurfaceResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CompanionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompanionError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encode as a response message.
    pub fn encode(&self) -> Result<Bytes, FailureDescriptor> {
        self.to_bytes().map(Bytes::from).map_err(FailureDescriptor::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn request_decodes() {
        let bytes = MainScreenSurfaceRequest::new("com.example.viewer").to_bytes().unwrap();
        let request = MainScreenSurfaceRequest::decode(&bytes).unwrap();
        assert_eq!(request.endpoint, "com.example.viewer");
    }

    #[test]
    fn garbage_request_is_invalid_argument() {
        let err = MainScreenSurfaceRequest::decode(&[0xFF; 3]).unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::InvalidArgument));
    }
}
