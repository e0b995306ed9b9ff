use crate::tilemap::TileMap;
use mordant::{ClientId, Facing, PlayerId};
use std::time::{Duration, Instant};

/// Outcome of a move request. Anything but `Success` leaves the player
/// untouched; the caller answers failures with the authoritative state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MoveResult {
    Success,
    InvalidDirection,
    OnCooldown,
    WrongFacing,
    Blocked,
    OccupiedByPlayer,
}

/// Authoritative per-player state. Owned exclusively by the game thread;
/// every mutation goes through the validated entry points below.
pub struct Player {
    player_id: PlayerId,
    client_id: ClientId,
    x: i16,
    y: i16,
    facing: Facing,
    last_move: Option<Instant>,
}

impl Player {
    pub fn new(player_id: PlayerId, client_id: ClientId, x: i16, y: i16, facing: Facing) -> Player {
        Player {
            player_id,
            client_id,
            x,
            y,
            facing,
            last_move: None,
        }
    }

    #[inline]
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn position(&self) -> (i16, i16) {
        (self.x, self.y)
    }

    #[inline]
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Validates and, on success, commits a one-tile move.
    ///
    /// The checks run in a fixed order: direction decode, cooldown, facing,
    /// terrain, other players. `claimed_facing` is the facing the client
    /// believes it has; the move passes the facing gate when either the
    /// claim or the authoritative facing already points in the move
    /// direction. Facing is only committed on success.
    ///
    /// `occupied` answers "does another player stand on this tile"; the
    /// spatial hash supplies it so this type stays free of world structure.
    pub fn attempt_move<F: Fn(i16, i16) -> bool>(
        &mut self,
        direction_raw: u8,
        claimed_facing_raw: u8,
        map: &TileMap,
        cooldown: Duration,
        ping_ms: u32,
        occupied: F,
        now: Instant,
    ) -> MoveResult {
        let direction = match Facing::from_wire(direction_raw) {
            Some(direction) => direction,
            None => return MoveResult::InvalidDirection,
        };

        if let Some(last_move) = self.last_move {
            if now.duration_since(last_move) < effective_cooldown(cooldown, ping_ms) {
                return MoveResult::OnCooldown;
            }
        }

        let claimed = Facing::from_wire(claimed_facing_raw);
        if claimed != Some(direction) && self.facing != direction {
            return MoveResult::WrongFacing;
        }

        let (dx, dy) = direction.delta();
        let target_x = self.x + dx;
        let target_y = self.y + dy;

        if map.is_blocked(target_x, target_y) {
            return MoveResult::Blocked;
        }

        if occupied(target_x, target_y) {
            return MoveResult::OccupiedByPlayer;
        }

        self.x = target_x;
        self.y = target_y;
        self.facing = direction;
        self.last_move = Some(now);

        MoveResult::Success
    }

    /// Turns in place. No cooldown; returns the new facing, or `None` for an
    /// out-of-range direction byte.
    pub fn attempt_turn(&mut self, direction_raw: u8) -> Option<Facing> {
        let direction = Facing::from_wire(direction_raw)?;
        self.facing = direction;
        Some(direction)
    }

    /// Authoritative reposition, bypassing validation. Spawn and admin
    /// teleport only; the caller must notify the spatial hash.
    pub fn teleport(&mut self, x: i16, y: i16) {
        self.x = x;
        self.y = y;
    }
}

/// Cooldown shortened by a bounded ping allowance: a client's measured RTT
/// is credited up to half the cooldown, so laggy clients are not throttled
/// below the rate well-connected ones achieve, while the peak move rate
/// stays capped at twice the nominal rate.
#[inline]
pub fn effective_cooldown(cooldown: Duration, ping_ms: u32) -> Duration {
    let cooldown_ms = mordant::time::duration_ms(cooldown);
    let leniency = u64::from(ping_ms).min(cooldown_ms / 2);

    Duration::from_millis(cooldown_ms - leniency)
}
