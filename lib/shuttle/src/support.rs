use crate::client::ClientHandle;
use mordant::ClientId;
use std::io;
use std::net;
use std::sync::Arc;

pub type NetResult<T> = Result<T, NetError>;

/// Transport-layer result plumbing. `Wait` means "no progress possible right
/// now, try again on the next readiness event"; everything fatal tears the
/// connection down.
#[derive(Debug, Eq, PartialEq)]
pub enum NetError {
    Wait,
    Fatal(FatalKind),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FatalKind {
    Protocol(ProtocolError),
    ViolationBudget,
    HandshakeTimeout,
    PingTimeout,
    SendOverflow,
    AddrParse,
    Io(io::ErrorKind),
}

/// Codec-level violations. Counted against the per-connection budget where
/// recoverable, fatal otherwise.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    /// Frame header did not start with the protocol magic.
    BadMagic,
    /// Frame length outside `1..=MAX_PAYLOAD`.
    BadLength,
    /// Payload ended before a declared field.
    Truncated,
    /// Length-prefixed string was not valid UTF-8.
    BadString,
    /// First payload byte is not a known opcode.
    UnknownOpcode(u8),
    /// Payload size disagrees with the opcode table.
    SizeMismatch,
    /// Handshake carried the wrong protocol version.
    VersionMismatch,
    /// Handshake carried the wrong client magic.
    MagicMismatch,
    /// First frame on a connection was not a handshake request.
    HandshakeExpected,
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetError::Wait,
            kind => NetError::Fatal(FatalKind::Io(kind)),
        }
    }
}

impl From<ProtocolError> for NetError {
    #[inline]
    fn from(err: ProtocolError) -> Self {
        NetError::Fatal(FatalKind::Protocol(err))
    }
}

impl From<net::AddrParseError> for NetError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetError::Fatal(FatalKind::AddrParse)
    }
}

pub trait ErrorUtils {
    /// True when the result is neither success nor a retriable `Wait`.
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetError::Wait) => false,
            _ => true,
        }
    }
}

/// Why a connection was dropped. Forwarded to the game domain so it can
/// detach the player and notify viewers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DropReason {
    ClientRequest,
    ProtocolViolation,
    HandshakeRejected,
    HandshakeTimeout,
    PingTimeout,
    TransportError,
    SendOverflow,
    /// The client produced more actions per tick than the policy allows.
    ActionOverflow,
    Shutdown,
}

/// The seam between the I/O and game domains.
///
/// Implementations run on the I/O thread and must confine themselves to
/// enqueuing typed work for the game thread; they never touch game state
/// directly and never block.
pub trait PacketRouter: Send + 'static {
    /// A connection completed a valid handshake and is now `Active`.
    fn handshake_complete(&self, client: &Arc<ClientHandle>);

    /// A complete frame payload arrived on an `Active` connection.
    /// `payload` starts with the opcode byte and is at least one byte long.
    fn route(&self, client: &Arc<ClientHandle>, payload: &[u8]);

    /// The connection is gone. Always the final callback for a client id.
    fn client_closed(&self, client_id: ClientId, reason: DropReason);
}
