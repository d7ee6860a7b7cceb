//! The closed set of device-control operations the gateway dispatches.
//!
//! Uses proper enums with `TryFrom`; unknown values never panic.

use std::fmt;
use std::str::FromStr;

use crate::call::CallShape;
use crate::error::CompanionError;

/// All operations understood by the companion.
///
/// Organized by category:
/// - `0x01xx`: Session / target
/// - `0x02xx`: Applications
/// - `0x03xx`: Files
/// - `0x04xx`: Screen / video
/// - `0x05xx`: Interaction
/// - `0x06xx`: Settings / privacy / media
/// - `0x07xx`: Diagnostics / debugging
/// - `0x08xx`: XCTest
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // ── Session / target (0x01xx) ────────────────────────────────
    Connect = 0x0101,
    Describe = 0x0102,

    // ── Applications (0x02xx) ────────────────────────────────────
    Install = 0x0201,
    Uninstall = 0x0202,
    Launch = 0x0203,
    ListApps = 0x0204,
    Terminate = 0x0205,

    // ── Files (0x03xx) ───────────────────────────────────────────
    Ls = 0x0301,
    Mkdir = 0x0302,
    Mv = 0x0303,
    Rm = 0x0304,
    Pull = 0x0305,
    Push = 0x0306,
    Tail = 0x0307,

    // ── Screen / video (0x04xx) ──────────────────────────────────
    Screenshot = 0x0401,
    Record = 0x0402,
    VideoStream = 0x0403,
    /// Share the main-screen frame buffer with another process.
    GetMainScreenSurface = 0x0404,

    // ── Interaction (0x05xx) ─────────────────────────────────────
    AccessibilityInfo = 0x0501,
    Focus = 0x0502,
    Hid = 0x0503,
    OpenUrl = 0x0504,
    SetLocation = 0x0505,
    SendNotification = 0x0506,
    SimulateMemoryWarning = 0x0507,

    // ── Settings / privacy / media (0x06xx) ──────────────────────
    Approve = 0x0601,
    Revoke = 0x0602,
    ClearKeychain = 0x0603,
    ContactsUpdate = 0x0604,
    Setting = 0x0605,
    GetSetting = 0x0606,
    ListSettings = 0x0607,
    AddMedia = 0x0608,

    // ── Diagnostics / debugging (0x07xx) ─────────────────────────
    CrashList = 0x0701,
    CrashShow = 0x0702,
    CrashDelete = 0x0703,
    Log = 0x0704,
    InstrumentsRun = 0x0705,
    XctraceRecord = 0x0706,
    Debugserver = 0x0707,
    Dap = 0x0708,

    // ── XCTest (0x08xx) ──────────────────────────────────────────
    XctestListBundles = 0x0801,
    XctestListTests = 0x0802,
    XctestRun = 0x0803,
}

impl Operation {
    /// Every operation, in catalogue order.
    pub const ALL: [Operation; 44] = [
        Operation::Connect,
        Operation::Describe,
        Operation::Install,
        Operation::Uninstall,
        Operation::Launch,
        Operation::ListApps,
        Operation::Terminate,
        Operation::Ls,
        Operation::Mkdir,
        Operation::Mv,
        Operation::Rm,
        Operation::Pull,
        Operation::Push,
        Operation::Tail,
        Operation::Screenshot,
        Operation::Record,
        Operation::VideoStream,
        Operation::GetMainScreenSurface,
        Operation::AccessibilityInfo,
        Operation::Focus,
        Operation::Hid,
        Operation::OpenUrl,
        Operation::SetLocation,
        Operation::SendNotification,
        Operation::SimulateMemoryWarning,
        Operation::Approve,
        Operation::Revoke,
        Operation::ClearKeychain,
        Operation::ContactsUpdate,
        Operation::Setting,
        Operation::GetSetting,
        Operation::ListSettings,
        Operation::AddMedia,
        Operation::CrashList,
        Operation::CrashShow,
        Operation::CrashDelete,
        Operation::Log,
        Operation::InstrumentsRun,
        Operation::XctraceRecord,
        Operation::Debugserver,
        Operation::Dap,
        Operation::XctestListBundles,
        Operation::XctestListTests,
        Operation::XctestRun,
    ];

    /// The RPC method name.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Describe => "describe",
            Operation::Install => "install",
            Operation::Uninstall => "uninstall",
            Operation::Launch => "launch",
            Operation::ListApps => "list_apps",
            Operation::Terminate => "terminate",
            Operation::Ls => "ls",
            Operation::Mkdir => "mkdir",
            Operation::Mv => "mv",
            Operation::Rm => "rm",
            Operation::Pull => "pull",
            Operation::Push => "push",
            Operation::Tail => "tail",
            Operation::Screenshot => "screenshot",
            Operation::Record => "record",
            Operation::VideoStream => "video_stream",
            Operation::GetMainScreenSurface => "get_main_screen_iosurface",
            Operation::AccessibilityInfo => "accessibility_info",
            Operation::Focus => "focus",
            Operation::Hid => "hid",
            Operation::OpenUrl => "open_url",
            Operation::SetLocation => "set_location",
            Operation::SendNotification => "send_notification",
            Operation::SimulateMemoryWarning => "simulate_memory_warning",
            Operation::Approve => "approve",
            Operation::Revoke => "revoke",
            Operation::ClearKeychain => "clear_keychain",
            Operation::ContactsUpdate => "contacts_update",
            Operation::Setting => "setting",
            Operation::GetSetting => "get_setting",
            Operation::ListSettings => "list_settings",
            Operation::AddMedia => "add_media",
            Operation::CrashList => "crash_list",
            Operation::CrashShow => "crash_show",
            Operation::CrashDelete => "crash_delete",
            Operation::Log => "log",
            Operation::InstrumentsRun => "instruments_run",
            Operation::XctraceRecord => "xctrace_record",
            Operation::Debugserver => "debugserver",
            Operation::Dap => "dap",
            Operation::XctestListBundles => "xctest_list_bundles",
            Operation::XctestListTests => "xctest_list_tests",
            Operation::XctestRun => "xctest_run",
        }
    }

    /// The call shape this operation is served with.
    pub fn shape(self) -> CallShape {
        match self {
            Operation::Hid | Operation::AddMedia | Operation::Push => CallShape::ClientStreaming,

            Operation::Log | Operation::Pull | Operation::XctestRun => CallShape::ServerStreaming,

            Operation::Install
            | Operation::Launch
            | Operation::Tail
            | Operation::Record
            | Operation::VideoStream
            | Operation::InstrumentsRun
            | Operation::XctraceRecord
            | Operation::Debugserver
            | Operation::Dap => CallShape::BidiStreaming,

            _ => CallShape::Unary,
        }
    }

    /// Whether the operation cannot run without the target's own logger.
    pub fn requires_target_logger(self) -> bool {
        matches!(
            self,
            Operation::Dap
                | Operation::Install
                | Operation::InstrumentsRun
                | Operation::XctraceRecord
                | Operation::Record
                | Operation::VideoStream
                | Operation::XctestRun
        )
    }
}

impl TryFrom<u32> for Operation {
    type Error = CompanionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| *op as u32 == value)
            .ok_or(CompanionError::UnknownVariant {
                type_name: "Operation",
                value: value as u64,
            })
    }
}

impl FromStr for Operation {
    type Err = CompanionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| CompanionError::Other(format!("unknown operation: {s}")))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
