use crate::client::ClientHandle;
use hashbrown::HashMap;
use mordant::ClientId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe map of client id to connection handle, shared between the
/// endpoint thread (register/remove on accept/close) and the game thread
/// (lookups for outbound traffic).
///
/// Broadcast fan-out uses `batch_lookup` so a tick takes the lock once,
/// not once per viewer.
pub struct ClientManager {
    clients: Mutex<HashMap<ClientId, Arc<ClientHandle>>>,
    next_id: AtomicU64,
}

impl ClientManager {
    pub fn new() -> ClientManager {
        ClientManager {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a connection id. Ids are never reused.
    #[inline]
    pub fn allocate_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, handle: Arc<ClientHandle>) {
        let previous = self.clients.lock().insert(handle.client_id(), handle);
        debug_assert!(previous.is_none(), "Client id registered twice");
    }

    pub fn remove(&self, client_id: ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.lock().remove(&client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.lock().get(&client_id).cloned()
    }

    /// Resolves a batch of client ids into `out` under a single lock
    /// acquisition. Unknown ids are skipped. `out` is cleared first.
    pub fn batch_lookup(&self, ids: &[ClientId], out: &mut HashMap<ClientId, Arc<ClientHandle>>) {
        out.clear();

        let clients = self.clients.lock();
        for &id in ids {
            if let Some(handle) = clients.get(&id) {
                out.insert(id, handle.clone());
            }
        }
    }

    /// Visits every registered handle. The lock is held for the duration;
    /// callers keep `f` short.
    pub fn for_each<F: FnMut(&Arc<ClientHandle>)>(&self, mut f: F) {
        for handle in self.clients.lock().values() {
            f(handle);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Aggregate transport counters across live connections, for the stats
    /// snapshot: `(bytes_sent, bytes_received)`.
    pub fn byte_totals(&self) -> (u64, u64) {
        let clients = self.clients.lock();

        clients.values().fold((0, 0), |(sent, received), handle| {
            (sent + handle.bytes_sent(), received + handle.bytes_received())
        })
    }
}
