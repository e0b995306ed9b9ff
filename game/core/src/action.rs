use crate::server::GameServer;
use shuttle::support::DropReason;

/// A unit of work produced by the I/O domain and consumed by the game
/// thread, bound to the originating client id on the queue.
///
/// The set is closed and data-only so an action stream can be recorded and
/// replayed in tests; `Custom` is the escape hatch for administrative work
/// and is not used on gameplay paths.
pub enum Action {
    /// Handshake completed; allocate and announce a player.
    Join,
    /// Move request carrying the raw wire bytes. Decoding direction bytes
    /// at execution time keeps `InvalidDirection` a game-level result.
    Move { direction: u8, facing: u8 },
    Turn { direction: u8 },
    Interact,
    /// Pong returned for an earlier ping; `timestamp` echoes our clock.
    Pong { timestamp: u32 },
    /// The client is gone or going; detach and announce the departure.
    Disconnect { reason: DropReason },
    Custom(Box<dyn FnOnce(&mut GameServer) + Send>),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Action::Join => write!(f, "Join"),
            Action::Move { direction, facing } => {
                write!(f, "Move {{ direction: {}, facing: {} }}", direction, facing)
            }
            Action::Turn { direction } => write!(f, "Turn {{ direction: {} }}", direction),
            Action::Interact => write!(f, "Interact"),
            Action::Pong { timestamp } => write!(f, "Pong {{ timestamp: {} }}", timestamp),
            Action::Disconnect { reason } => write!(f, "Disconnect {{ reason: {:?} }}", reason),
            Action::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
