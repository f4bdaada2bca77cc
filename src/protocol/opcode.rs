//! Gateway opcodes. Values are fixed by the remote service.

// -----------------------------------------------------------------------------
// ----- Opcode ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Dispatch,       // 0  (receive)
    Heartbeat,      // 1  (send / receive)
    Identify,       // 2  (send)
    PresenceUpdate, // 3  (send)
    VoiceState,     // 4  (send)
    Resume,         // 6  (send)
    Reconnect,      // 7  (receive)
    RequestMembers, // 8  (send)
    InvalidSession, // 9  (receive)
    Hello,          // 10 (receive)
    HeartbeatAck,   // 11 (receive)
}

// -----------------------------------------------------------------------------
// ----- Opcode: Static --------------------------------------------------------

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let op = match value {
            0 => Opcode::Dispatch,
            1 => Opcode::Heartbeat,
            2 => Opcode::Identify,
            3 => Opcode::PresenceUpdate,
            4 => Opcode::VoiceState,
            6 => Opcode::Resume,
            7 => Opcode::Reconnect,
            8 => Opcode::RequestMembers,
            9 => Opcode::InvalidSession,
            10 => Opcode::Hello,
            11 => Opcode::HeartbeatAck,
            _ => return None,
        };
        Some(op)
    }
}

// -----------------------------------------------------------------------------
// ----- Opcode: Public --------------------------------------------------------

impl Opcode {
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Dispatch => 0,
            Opcode::Heartbeat => 1,
            Opcode::Identify => 2,
            Opcode::PresenceUpdate => 3,
            Opcode::VoiceState => 4,
            Opcode::Resume => 6,
            Opcode::Reconnect => 7,
            Opcode::RequestMembers => 8,
            Opcode::InvalidSession => 9,
            Opcode::Hello => 10,
            Opcode::HeartbeatAck => 11,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_match_the_gateway() {
        assert_eq!(Opcode::Dispatch.as_u8(), 0);
        assert_eq!(Opcode::Identify.as_u8(), 2);
        assert_eq!(Opcode::Resume.as_u8(), 6);
        assert_eq!(Opcode::Hello.as_u8(), 10);
        assert_eq!(Opcode::HeartbeatAck.as_u8(), 11);
    }

    #[test]
    fn unassigned_values_are_rejected() {
        assert_eq!(Opcode::from_u8(5), None);
        assert_eq!(Opcode::from_u8(12), None);
        assert_eq!(Opcode::from_u8(9), Some(Opcode::InvalidSession));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
