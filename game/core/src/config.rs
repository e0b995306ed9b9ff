use serde_derive::{Deserialize, Serialize};
use shuttle::endpoint::EndpointConfig;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Serialize, Deserialize, Clone)]
pub struct Server {
    pub address: String,
    pub max_clients: usize,
    pub handshake_timeout_secs: u64,
    pub ping_interval_ms: u64,
    /// Unanswered ping intervals tolerated before the connection is dropped.
    pub ping_timeout_intervals: u32,
    pub close_drain_secs: u64,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Game {
    pub fps: u64,
    pub view_range: i16,
    pub move_cooldown_ms: u64,
    /// Inbound actions a single client may contribute to one tick.
    pub max_actions_per_tick: u32,
    pub action_queue_capacity: usize,
    /// How often player positions are pushed to the persistence sink.
    pub persist_interval_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WallRect {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Map {
    pub width: i16,
    pub height: i16,
    pub walls: Vec<WallRect>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct GameConfig {
    pub server: Server,
    pub game: Game,
    pub map: Map,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            server: Server {
                address: format!("0.0.0.0:{}", DEFAULT_PORT),
                max_clients: 4096,
                handshake_timeout_secs: 5,
                ping_interval_ms: 2000,
                ping_timeout_intervals: 3,
                close_drain_secs: 3,
            },
            game: Game {
                fps: 20,
                view_range: 5,
                move_cooldown_ms: 180,
                max_actions_per_tick: 32,
                action_queue_capacity: 65536,
                persist_interval_secs: 15,
            },
            map: Map {
                width: 512,
                height: 512,
                walls: Vec::new(),
            },
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path).expect("Error loading game configuration file")
    }

    pub fn to_toml(&self) -> String {
        serdeconv::to_toml_string(self).expect("Error serializing game configuration")
    }

    /// I/O-thread policy derived from this config.
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            address: self.server.address.clone(),
            max_clients: self.server.max_clients,
            handshake_timeout: Duration::from_secs(self.server.handshake_timeout_secs),
            ping_timeout: Duration::from_millis(
                self.server.ping_interval_ms * u64::from(self.server.ping_timeout_intervals),
            ),
            close_drain_timeout: Duration::from_secs(self.server.close_drain_secs),
        }
    }

    #[inline]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(1000 / self.game.fps.max(1))
    }

    #[inline]
    pub fn move_cooldown(&self) -> Duration {
        Duration::from_millis(self.game.move_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let config = GameConfig::default();
        let text = config.to_toml();

        let parsed: GameConfig = serdeconv::from_toml_str(&text).unwrap();
        assert_eq!(parsed.server.address, config.server.address);
        assert_eq!(parsed.game.fps, 20);
        assert_eq!(parsed.game.view_range, 5);
        assert_eq!(parsed.map.width, 512);
    }

    #[test]
    fn test_tick_duration() {
        let config = GameConfig::default();
        assert_eq!(config.tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_endpoint_ping_timeout_scales_with_intervals() {
        let mut config = GameConfig::default();
        config.server.ping_interval_ms = 1000;
        config.server.ping_timeout_intervals = 4;

        assert_eq!(config.endpoint().ping_timeout, Duration::from_secs(4));
    }
}
