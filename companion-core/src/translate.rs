//! Failure translation: [`FailureDescriptor`] → [`Status`].
//!
//! This is the only place failure text is interpreted. A structured
//! [`FailureKind`] always wins; the substring table below is a fallback
//! for untagged causes coming from layers that only produce messages.
//! Rules are evaluated top to bottom and the first match wins, so more
//! specific wording must sit above more general wording.
//!
//! Only rules whose pattern is specific to frame-buffer failures carry a
//! canonical message. Rules keyed on generic wording keep the producer's
//! cause.

use crate::error::{FailureDescriptor, FailureKind};
use crate::status::{Status, StatusCode};

struct Rule {
    pattern: &'static str,
    code: StatusCode,
    /// `None` keeps the failure's own cause.
    message: Option<&'static str>,
}

const LEGACY_RULES: &[Rule] = &[
    Rule {
        pattern: "only supported for simulator targets",
        code: StatusCode::Unimplemented,
        message: None,
    },
    Rule {
        pattern: "must be booted",
        code: StatusCode::FailedPrecondition,
        message: None,
    },
    Rule {
        pattern: "doesn't support framebuffer access",
        code: StatusCode::Unimplemented,
        message: Some("Target doesn't support framebuffer access"),
    },
    Rule {
        pattern: "Failed to connect to framebuffer",
        code: StatusCode::Internal,
        message: None,
    },
    Rule {
        pattern: "Timeout waiting for IOSurface",
        code: StatusCode::DeadlineExceeded,
        message: Some("Timeout waiting for IOSurface to become available"),
    },
    Rule {
        pattern: "No IOSurface available",
        code: StatusCode::Unavailable,
        message: Some("No IOSurface currently available"),
    },
    Rule {
        pattern: "Invalid IOSurface",
        code: StatusCode::DataLoss,
        message: Some("Invalid IOSurface properties"),
    },
    Rule {
        pattern: "Invalid argument",
        code: StatusCode::InvalidArgument,
        message: None,
    },
];

/// Translate a failure into the status surfaced to the caller.
pub fn translate(failure: &FailureDescriptor) -> Status {
    if let Some(kind) = failure.kind() {
        return Status::new(code_for_kind(kind), failure.cause());
    }

    LEGACY_RULES
        .iter()
        .find(|rule| failure.cause().contains(rule.pattern))
        .map(|rule| Status::new(rule.code, rule.message.unwrap_or(failure.cause())))
        .unwrap_or_else(|| Status::new(StatusCode::Internal, failure.cause()))
}

fn code_for_kind(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidArgument => StatusCode::InvalidArgument,
        FailureKind::Unsupported => StatusCode::Unimplemented,
        FailureKind::PreconditionFailed => StatusCode::FailedPrecondition,
        FailureKind::Internal => StatusCode::Internal,
        FailureKind::Timeout => StatusCode::DeadlineExceeded,
        FailureKind::Unavailable => StatusCode::Unavailable,
        FailureKind::DataLoss => StatusCode::DataLoss,
        FailureKind::Cancelled => StatusCode::Cancelled,
    }
}
