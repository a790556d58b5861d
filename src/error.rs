// src/error.rs

//! Fatal error taxonomy for the event core.
//!
//! Anything in here terminates the loop and the process. Recoverable
//! conditions are logged where they happen and never reach this type.

/// A condition after which the event loop cannot continue.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// use `err.downcast_ref::<FatalError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// The display server could not be reached at startup.
    DisplayConnect,
    /// The session bus could not be reached at startup.
    BusConnect,
    /// The display server delivered an error notification.
    ProtocolError { code: u8, resource: u64 },
    /// The display connection itself reported an I/O failure.
    DisplayIo,
    /// The blocking wait primitive failed.
    Wait,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::DisplayConnect => write!(f, "failed to connect to the display server"),
            FatalError::BusConnect => write!(f, "failed to connect to the session bus"),
            FatalError::ProtocolError { code, resource } => write!(
                f,
                "display protocol error (code {}, resource {:#x})",
                code, resource
            ),
            FatalError::DisplayIo => write!(f, "display connection I/O error"),
            FatalError::Wait => write!(f, "waiting on the poll set failed"),
        }
    }
}

impl std::error::Error for FatalError {}

/// Returns the `FatalError` carried by `err`, if any.
///
/// Finds it whether it was the original error or attached as context.
pub fn fatal_kind(err: &anyhow::Error) -> Option<&FatalError> {
    err.downcast_ref::<FatalError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<FatalError>()))
}
