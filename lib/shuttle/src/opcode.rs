use crate::support::ProtocolError;

/// Every opcode on the wire, client- and server-bound. The first payload
/// byte of a frame is always one of these.
///
/// `0x40` and the reserved combat/chat ranges exist in the table so clients
/// sending them are not treated as hostile, but carry no behavior yet.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Client -> server
    HandshakeRequest = 0x00,
    MoveRequest = 0x01,
    TurnRequest = 0x02,
    InteractRequest = 0x04,
    AttackRequest = 0x40,
    ClientPing = 0xF6,
    ClientPong = 0xF9,
    DisconnectRequest = 0xFE,

    // Server -> client
    Welcome = 0x10,
    PositionCorrection = 0x11,
    FacingCorrection = 0x12,
    BatchPlayerSpatial = 0x25,
    LeftGame = 0x26,
    HandshakeAccepted = 0xF0,
    ServerShutdown = 0xF2,
    ServerPong = 0xF7,
    ServerPing = 0xF8,
}

/// Declared payload size for an opcode, including the opcode byte itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PayloadSize {
    Fixed(usize),
    Variable { min: usize },
}

impl Opcode {
    pub fn from_wire(raw: u8) -> Result<Opcode, ProtocolError> {
        let op = match raw {
            0x00 => Opcode::HandshakeRequest,
            0x01 => Opcode::MoveRequest,
            0x02 => Opcode::TurnRequest,
            0x04 => Opcode::InteractRequest,
            0x40 => Opcode::AttackRequest,
            0xF6 => Opcode::ClientPing,
            0xF9 => Opcode::ClientPong,
            0xFE => Opcode::DisconnectRequest,
            0x10 => Opcode::Welcome,
            0x11 => Opcode::PositionCorrection,
            0x12 => Opcode::FacingCorrection,
            0x25 => Opcode::BatchPlayerSpatial,
            0x26 => Opcode::LeftGame,
            0xF0 => Opcode::HandshakeAccepted,
            0xF2 => Opcode::ServerShutdown,
            0xF7 => Opcode::ServerPong,
            0xF8 => Opcode::ServerPing,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };

        Ok(op)
    }

    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// The authoritative size table. Fixed sizes are matched exactly,
    /// variable sizes are a lower bound.
    pub fn payload_size(self) -> PayloadSize {
        use self::PayloadSize::*;

        match self {
            Opcode::HandshakeRequest => Fixed(7),
            Opcode::MoveRequest => Fixed(3),
            Opcode::TurnRequest => Fixed(2),
            Opcode::InteractRequest => Fixed(1),
            Opcode::AttackRequest => Fixed(1),
            Opcode::ClientPing => Fixed(5),
            Opcode::ClientPong => Fixed(5),
            Opcode::DisconnectRequest => Fixed(1),
            Opcode::Welcome => Fixed(14),
            Opcode::PositionCorrection => Fixed(6),
            Opcode::FacingCorrection => Fixed(2),
            Opcode::BatchPlayerSpatial => Variable { min: 2 },
            Opcode::LeftGame => Fixed(9),
            Opcode::HandshakeAccepted => Fixed(1),
            Opcode::ServerShutdown => Fixed(2),
            Opcode::ServerPong => Fixed(5),
            Opcode::ServerPing => Fixed(5),
        }
    }

    /// Validates a payload length against the size table: `!=` for fixed
    /// opcodes, `<` for variable minima.
    #[inline]
    pub fn size_matches(self, payload_len: usize) -> bool {
        match self.payload_size() {
            PayloadSize::Fixed(expected) => payload_len == expected,
            PayloadSize::Variable { min } => payload_len >= min,
        }
    }
}
