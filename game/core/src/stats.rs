use parking_lot::Mutex;

/// Immutable view of one tick, published for out-of-process consumers (the
/// debug dashboard and the bandwidth meter live outside the core). Readers
/// never touch game-thread structures; they clone the latest slot.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Monotonic publish counter; lets readers detect missed ticks.
    pub seq: u64,
    pub tick: u64,
    pub tick_us: u64,
    pub tick_overruns: u64,
    pub actions_processed: usize,
    pub queued_actions: usize,
    pub dirty_players: usize,
    pub broadcast_us: u64,
    pub players: usize,
    pub connections: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Single-slot publisher. The game thread overwrites the slot each tick;
/// any thread may snapshot it.
pub struct StatsPublisher {
    slot: Mutex<StatsSnapshot>,
}

impl StatsPublisher {
    pub fn new() -> StatsPublisher {
        StatsPublisher {
            slot: Mutex::new(StatsSnapshot::default()),
        }
    }

    pub fn publish(&self, mut snapshot: StatsSnapshot) {
        let mut slot = self.slot.lock();
        snapshot.seq = slot.seq + 1;
        *slot = snapshot;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.slot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_bumps_sequence() {
        let publisher = StatsPublisher::new();

        publisher.publish(StatsSnapshot {
            tick: 10,
            ..Default::default()
        });
        publisher.publish(StatsSnapshot {
            tick: 11,
            ..Default::default()
        });

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.seq, 2);
        assert_eq!(snapshot.tick, 11);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let publisher = StatsPublisher::new();
        publisher.publish(StatsSnapshot {
            players: 3,
            ..Default::default()
        });

        let snapshot = publisher.snapshot();
        publisher.publish(StatsSnapshot {
            players: 4,
            ..Default::default()
        });

        assert_eq!(snapshot.players, 3);
    }
}
