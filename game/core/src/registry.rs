use crate::player::Player;
use hashbrown::{HashMap, HashSet};
use mordant::{ClientId, Facing, PlayerId};

/// Authoritative player index: id → player, connection binding and the
/// per-tick dirty set. Game-thread-only; no interior locking.
pub struct PlayerRegistry {
    players: HashMap<PlayerId, Player>,
    client_to_player: HashMap<ClientId, PlayerId>,
    dirty: HashSet<PlayerId>,
    next_id: PlayerId,
}

impl PlayerRegistry {
    pub fn new() -> PlayerRegistry {
        PlayerRegistry {
            players: HashMap::new(),
            client_to_player: HashMap::new(),
            dirty: HashSet::new(),
            // Zero is the reserved "no player" id.
            next_id: 1,
        }
    }

    /// Creates a player bound to `client_id` and returns the fresh id. Ids
    /// are allocated monotonically and never reused.
    pub fn create_player(
        &mut self,
        client_id: ClientId,
        x: i16,
        y: i16,
        facing: Facing,
    ) -> PlayerId {
        let player_id = self.next_id;
        self.next_id += 1;

        self.players
            .insert(player_id, Player::new(player_id, client_id, x, y, facing));
        self.client_to_player.insert(client_id, player_id);

        player_id
    }

    #[inline]
    pub fn get(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    #[inline]
    pub fn get_mut(&mut self, player_id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&player_id)
    }

    #[inline]
    pub fn player_id_of(&self, client_id: ClientId) -> Option<PlayerId> {
        self.client_to_player.get(&client_id).copied()
    }

    #[inline]
    pub fn get_by_client(&self, client_id: ClientId) -> Option<&Player> {
        let player_id = self.client_to_player.get(&client_id)?;
        self.players.get(player_id)
    }

    #[inline]
    pub fn get_by_client_mut(&mut self, client_id: ClientId) -> Option<&mut Player> {
        let player_id = *self.client_to_player.get(&client_id)?;
        self.players.get_mut(&player_id)
    }

    /// Flags a player for broadcast this tick. Idempotent; unknown ids are
    /// ignored.
    #[inline]
    pub fn mark_dirty(&mut self, player_id: PlayerId) {
        if self.players.contains_key(&player_id) {
            self.dirty.insert(player_id);
        }
    }

    /// Moves the dirty set into `out` (cleared first) and resets it for the
    /// next tick.
    pub fn drain_dirty(&mut self, out: &mut Vec<PlayerId>) {
        out.clear();
        out.extend(self.dirty.drain());
    }

    #[inline]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Erases a player from every index and returns it. The caller is
    /// responsible for the spatial hash and the visibility tracker.
    pub fn remove(&mut self, player_id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&player_id)?;

        self.client_to_player.remove(&player.client_id());
        self.dirty.remove(&player_id);

        Some(player)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }
}
