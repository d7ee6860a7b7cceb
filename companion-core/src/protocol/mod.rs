//! Structured request/response payloads for operations the core serves
//! itself. Payloads are serialized with `serde` + `bincode` and carried in
//! `Request` / `Response` frame bodies.

pub mod surface;

pub use surface::{MainScreenSurfaceRequest, MainScreenSurfaceResponse};
