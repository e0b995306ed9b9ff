use mordant::ClientId;
use parking_lot::Mutex;

/// Multi-producer, single-consumer hand-off from the I/O domain to the game
/// thread. Producers append under the lock; the consumer swaps the whole
/// queue out and processes it lock-free, so the critical section is a few
/// pointer moves regardless of volume.
///
/// Order is FIFO over arrival, which doubles as the tie-break when two
/// clients contend for the same tile in one tick.
pub struct ActionQueue<C> {
    entries: Mutex<Vec<(ClientId, C)>>,
    capacity: usize,
}

impl<C> ActionQueue<C> {
    pub fn new(capacity: usize) -> ActionQueue<C> {
        ActionQueue {
            entries: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Appends an entry. Returns false (dropping the entry) once the queue
    /// holds `capacity` items; the caller decides whether that client is
    /// flooding.
    #[inline]
    pub fn push(&self, client_id: ClientId, command: C) -> bool {
        let mut entries = self.entries.lock();

        if entries.len() >= self.capacity {
            return false;
        }

        entries.push((client_id, command));
        true
    }

    /// Appends an entry regardless of the capacity bound. Reserved for
    /// control traffic (disconnect notices) that must never be dropped.
    #[inline]
    pub fn push_critical(&self, client_id: ClientId, command: C) {
        self.entries.lock().push((client_id, command));
    }

    /// Swaps the queue contents into `out` (cleared first). The lock is held
    /// only for the swap, never during execution.
    #[inline]
    pub fn drain_into(&self, out: &mut Vec<(ClientId, C)>) {
        out.clear();
        std::mem::swap(&mut *self.entries.lock(), out);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = ActionQueue::new(16);
        queue.push(1, "a");
        queue.push(2, "b");
        queue.push(1, "c");

        let mut drained = Vec::new();
        queue.drain_into(&mut drained);

        assert_eq!(drained, vec![(1, "a"), (2, "b"), (1, "c")]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_drain_replaces_previous_buffer() {
        let queue = ActionQueue::new(16);
        let mut drained = vec![(9u64, "stale")];

        queue.push(3, "x");
        queue.drain_into(&mut drained);

        assert_eq!(drained, vec![(3, "x")]);
    }

    #[test]
    fn test_capacity_bound() {
        let queue = ActionQueue::new(2);

        assert!(queue.push(1, 0));
        assert!(queue.push(1, 1));
        assert!(!queue.push(1, 2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(ActionQueue::new(10_000));
        let mut handles = Vec::new();

        for producer in 0..4u64 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for seq in 0..100u32 {
                    assert!(queue.push(producer, seq));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = Vec::new();
        queue.drain_into(&mut drained);
        assert_eq!(drained.len(), 400);

        // Per-producer order is preserved even though the global interleaving
        // is arbitrary.
        for producer in 0..4u64 {
            let seqs: Vec<u32> = drained
                .iter()
                .filter(|(id, _)| *id == producer)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(seqs, (0..100).collect::<Vec<_>>());
        }
    }
}
