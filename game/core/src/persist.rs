use mordant::logging;
use mordant::PlayerId;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

/// Work items for the persistence sink. The sink itself (SQL store, its
/// worker thread) lives outside the core; this is the queue boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistRequest {
    SavePosition { player_id: PlayerId, x: i16, y: i16 },
    UpdateStats { player_id: PlayerId, level: u32, exp: u64 },
}

/// Non-blocking submission handle. A full or disconnected sink drops the
/// request with a debug log; the tick never waits on persistence.
pub struct PersistHandle {
    tx: Option<SyncSender<PersistRequest>>,
    log: logging::Logger,
}

impl PersistHandle {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        tx: SyncSender<PersistRequest>,
        log: L,
    ) -> PersistHandle {
        PersistHandle {
            tx: Some(tx),
            log: logging::child_or_discard(log),
        }
    }

    /// A handle with no sink attached; every submission is a no-op.
    pub fn disabled() -> PersistHandle {
        PersistHandle {
            tx: None,
            log: logging::Logger::root(logging::Discard, logging::o!()),
        }
    }

    pub fn save_position(&self, player_id: PlayerId, x: i16, y: i16) {
        self.submit(PersistRequest::SavePosition { player_id, x, y });
    }

    pub fn update_stats(&self, player_id: PlayerId, level: u32, exp: u64) {
        self.submit(PersistRequest::UpdateStats { player_id, level, exp });
    }

    fn submit(&self, request: PersistRequest) {
        let tx = match self.tx.as_ref() {
            Some(tx) => tx,
            None => return,
        };

        match tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                logging::debug!(self.log, "persistence queue full, dropping request";
                                "context" => "submit",
                                "request" => ?request);
            }
            Err(TrySendError::Disconnected(request)) => {
                logging::debug!(self.log, "persistence sink gone, dropping request";
                                "context" => "submit",
                                "request" => ?request);
            }
        }
    }
}

/// Builds the queue boundary: the core keeps the handle, the external sink
/// thread consumes the receiver.
pub fn persist_channel(capacity: usize) -> (PersistHandle, Receiver<PersistRequest>) {
    let (tx, rx) = sync_channel(capacity);
    (PersistHandle::new(tx, None), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_reach_the_sink() {
        let (handle, rx) = persist_channel(8);

        handle.save_position(1, 5, 6);
        handle.update_stats(1, 2, 300);

        assert_eq!(
            rx.try_recv().unwrap(),
            PersistRequest::SavePosition {
                player_id: 1,
                x: 5,
                y: 6
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PersistRequest::UpdateStats {
                player_id: 1,
                level: 2,
                exp: 300
            }
        );
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (handle, rx) = persist_channel(1);

        handle.save_position(1, 0, 0);
        handle.save_position(2, 0, 0); // dropped

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_sink_tolerated() {
        let (handle, rx) = persist_channel(1);
        drop(rx);

        handle.save_position(1, 0, 0);
    }

    #[test]
    fn test_disabled_handle() {
        let handle = PersistHandle::disabled();
        handle.save_position(1, 0, 0);
    }
}
