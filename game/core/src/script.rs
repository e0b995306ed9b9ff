use mordant::{Facing, PlayerId};

/// Hook surface for hot-reloadable game rules. One synchronous entry per
/// event; implementations must return promptly, as they run inside the tick.
/// The engine hosting the scripts is outside the core.
pub trait GameHooks: Send {
    fn on_player_joined(&self, _player_id: PlayerId, _x: i16, _y: i16) {}
    fn on_player_moved(&self, _player_id: PlayerId, _x: i16, _y: i16, _facing: Facing) {}
    fn on_player_left(&self, _player_id: PlayerId) {}
    fn on_player_interact(&self, _player_id: PlayerId) {}
}

/// Default hooks: every event is ignored.
pub struct NoopHooks;

impl GameHooks for NoopHooks {}

/// Player id rendered for scripting hosts whose numbers lose precision
/// beyond 2^53. Ids always cross that boundary as strings.
#[inline]
pub fn script_id(player_id: PlayerId) -> String {
    player_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_id_is_lossless_beyond_53_bits() {
        let id: PlayerId = (1 << 53) + 3;
        assert_eq!(script_id(id), "9007199254740995");
    }
}
