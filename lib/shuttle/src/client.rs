use crate::support::DropReason;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Upper bound on ping round-trips fed into the smoothing window, in ms.
pub const PING_CLAMP_MS: u32 = 5000;

/// Samples kept for the smoothed RTT.
const PING_WINDOW: usize = 5;

/// Outbound packets a single connection may have queued before the server
/// considers it unable to keep up.
pub const SEND_QUEUE_LIMIT: usize = 512;

/// Outcome of queuing a packet for a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnqueueResult {
    Queued,
    /// The connection is draining out; the packet was discarded.
    Closing,
    /// The queue is at its depth limit; the packet was discarded and the
    /// caller should consider dropping the client.
    Overflow,
}

struct PingWindow {
    samples: [u32; PING_WINDOW],
    len: usize,
    next: usize,
}

impl PingWindow {
    fn record(&mut self, rtt_ms: u32) -> u32 {
        self.samples[self.next] = rtt_ms;
        self.next = (self.next + 1) % PING_WINDOW;
        self.len = (self.len + 1).min(PING_WINDOW);

        let sum: u64 = self.samples[..self.len].iter().map(|&s| u64::from(s)).sum();
        (sum / self.len as u64) as u32
    }
}

/// The shared half of a connection, visible to both ownership domains.
///
/// The game thread pushes framed buffers onto the send queue and reads the
/// smoothed ping; the I/O thread drains the queue to the socket and keeps the
/// transport counters current. Everything here is either behind a short-held
/// mutex or an atomic, so neither domain ever waits on the other.
pub struct ClientHandle {
    client_id: mordant::ClientId,
    remote_addr: SocketAddr,

    send_queue: Mutex<VecDeque<Arc<Vec<u8>>>>,

    // Closing is the one flag with hand-off semantics: once set, enqueue
    // refuses new packets. Counters are plain relaxed tallies.
    closing: AtomicBool,
    close_reason: Mutex<Option<DropReason>>,
    header_violations: AtomicU32,
    invalid_packets: AtomicU32,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Ping state. Sent/pong stamps are monotonic ms (see mordant::time).
    ping_sent_ms: AtomicU64,
    last_pong_ms: AtomicU64,
    ping_ms: AtomicU32,
    ping_window: Mutex<PingWindow>,
}

impl ClientHandle {
    pub fn new(client_id: mordant::ClientId, remote_addr: SocketAddr, now_ms: u64) -> ClientHandle {
        ClientHandle {
            client_id,
            remote_addr,
            send_queue: Mutex::new(VecDeque::new()),
            closing: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            header_violations: AtomicU32::new(0),
            invalid_packets: AtomicU32::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            ping_sent_ms: AtomicU64::new(0),
            last_pong_ms: AtomicU64::new(now_ms),
            ping_ms: AtomicU32::new(0),
            ping_window: Mutex::new(PingWindow {
                samples: [0; PING_WINDOW],
                len: 0,
                next: 0,
            }),
        }
    }

    #[inline]
    pub fn client_id(&self) -> mordant::ClientId {
        self.client_id
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a framed buffer for transmission.
    pub fn enqueue(&self, packet: Arc<Vec<u8>>) -> EnqueueResult {
        if self.is_closing() {
            return EnqueueResult::Closing;
        }

        let mut queue = self.send_queue.lock();

        if queue.len() >= SEND_QUEUE_LIMIT {
            return EnqueueResult::Overflow;
        }

        queue.push_back(packet);
        EnqueueResult::Queued
    }

    /// Move queued packets into the socket staging buffer. `sink` returns
    /// false when it cannot take the packet, which leaves it queued for the
    /// next writable event.
    pub fn drain_send<F: FnMut(&[u8]) -> bool>(&self, mut sink: F) {
        let mut queue = self.send_queue.lock();

        while let Some(front) = queue.front() {
            if !sink(front) {
                break;
            }
            queue.pop_front();
        }
    }

    #[inline]
    pub fn send_queue_len(&self) -> usize {
        self.send_queue.lock().len()
    }

    #[inline]
    pub fn set_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Ask the I/O thread to close this connection. Used by the game thread
    /// for kicks; already-queued packets still drain out first.
    pub fn request_close(&self, reason: DropReason) {
        *self.close_reason.lock() = Some(reason);
        self.set_closing();
    }

    /// The reason supplied by `request_close`, if any. Consumed once.
    pub fn take_close_reason(&self) -> Option<DropReason> {
        self.close_reason.lock().take()
    }

    /// Bump the header-violation counter, returning the new total.
    #[inline]
    pub fn record_header_violation(&self) -> u32 {
        self.header_violations.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn header_violations(&self) -> u32 {
        self.header_violations.load(Ordering::Relaxed)
    }

    /// Bump the malformed-packet counter, returning the new total.
    #[inline]
    pub fn record_invalid_packet(&self) -> u32 {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn invalid_packets(&self) -> u32 {
        self.invalid_packets.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_bytes_sent(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_received(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Stamp the moment a ping request was queued for this client.
    #[inline]
    pub fn record_ping_sent(&self, now_ms: u64) {
        self.ping_sent_ms.store(now_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn ping_sent_ms(&self) -> u64 {
        self.ping_sent_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_pong_ms(&self) -> u64 {
        self.last_pong_ms.load(Ordering::Relaxed)
    }

    /// Record a returned pong: clamps the round-trip to `PING_CLAMP_MS`,
    /// folds it into the rolling window and publishes the smoothed value.
    pub fn record_pong(&self, rtt_ms: u64, now_ms: u64) {
        let clamped = rtt_ms.min(u64::from(PING_CLAMP_MS)) as u32;

        let smoothed = self.ping_window.lock().record(clamped);
        self.ping_ms.store(smoothed, Ordering::Relaxed);
        self.last_pong_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Smoothed round-trip estimate in milliseconds.
    #[inline]
    pub fn ping_ms(&self) -> u32 {
        self.ping_ms.load(Ordering::Relaxed)
    }
}
