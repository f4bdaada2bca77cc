//! Close-code policy for the gateway socket.

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const NORMAL_CLOSURE: u16 = 1000;
pub const UNKNOWN_ERROR: u16 = 4000;
pub const AUTHENTICATION_FAILED: u16 = 4004;
pub const INVALID_SEQUENCE: u16 = 4007;
pub const SESSION_TIMED_OUT: u16 = 4009;
pub const INVALID_INTENTS: u16 = 4013;
pub const DISALLOWED_INTENTS: u16 = 4014;

// -----------------------------------------------------------------------------
// ----- CloseAction -----------------------------------------------------------

/// What the connection should do after the socket closed with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Terminal; surface an error and never reconnect.
    Fatal,

    /// The session is gone; reconnect with a fresh Identify.
    Reidentify,

    /// Reconnect and try to continue the session.
    Resume,
}

/// `None` means the socket went away without a close frame.
pub fn classify_close(code: Option<u16>) -> CloseAction {
    match code {
        Some(AUTHENTICATION_FAILED | INVALID_INTENTS | DISALLOWED_INTENTS) => CloseAction::Fatal,
        Some(INVALID_SEQUENCE | SESSION_TIMED_OUT) => CloseAction::Reidentify,
        _ => CloseAction::Resume,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
