use crate::buffer::Buffer;
use crate::client::ClientHandle;
use crate::codec::{parse_frame_header, PayloadReader, FRAME_HEADER_SIZE};
use crate::opcode::Opcode;
use crate::support::{DropReason, FatalKind, NetError, NetResult, PacketRouter, ProtocolError};
use mordant::logging;
use mordant::{CLIENT_MAGIC, PROTOCOL_VERSION};
use mio::net::TcpStream;
use std::net::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};

const READ_BUF_SIZE: usize = 65536;
const WRITE_BUF_SIZE: usize = 2 * 65536;

/// Invalid frame magics tolerated before the connection is dropped.
pub const HEADER_VIOLATION_LIMIT: u32 = 3;

/// Connection lifecycle. Transitions form a strict DAG:
/// `Handshaking → Active → Closing` and `Handshaking → Closing`; nothing
/// ever leaves `Closing`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnState {
    /// Accepted, waiting for a valid handshake frame.
    Handshaking(Instant),
    /// Handshake done; full framed packet loop.
    Active,
    /// Draining the send queue best-effort; no new traffic in either
    /// direction is routed.
    Closing { since: Instant, reason: DropReason },
}

/// The I/O-thread half of a single client socket: stream, staging buffers
/// and the state machine. The game-thread half lives on the shared
/// [`ClientHandle`].
pub struct Connection {
    handle: Arc<ClientHandle>,
    stream: Option<TcpStream>,
    state: ConnState,
    read_buf: Buffer,
    write_buf: Buffer,
    log: logging::Logger,
}

impl Connection {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        handle: Arc<ClientHandle>,
        now: Instant,
        log: L,
    ) -> Connection {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("client_id" => handle.client_id())),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Connection {
            handle,
            stream: None,
            state: ConnState::Handshaking(now),
            read_buf: Buffer::new(READ_BUF_SIZE),
            write_buf: Buffer::new(WRITE_BUF_SIZE),
            log,
        }
    }

    /// Attach the accepted stream. Must happen before any I/O.
    pub fn open(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
        logging::debug!(self.log, "connection opened";
                        "context" => "open",
                        "remote_addr" => %self.handle.remote_addr());
    }

    #[inline]
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        matches!(self.state, ConnState::Closing { .. })
    }

    /// Registers the stream on the supplied poll.
    pub fn register(&self, poll: &mio::Poll, token: mio::Token) -> NetResult<()> {
        poll.register(
            self.stream.as_ref().expect("Connection must have a stream"),
            token,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )
        .map_err(Into::into)
    }

    pub fn deregister(&self, poll: &mio::Poll) {
        if let Some(stream) = self.stream.as_ref() {
            // Deregistration failure only matters if the poll is alive, in
            // which case it cannot fail.
            drop(poll.deregister(stream));
        }
    }

    /// Pulls all available bytes off the socket into the read buffer.
    /// Returns the byte count; zero means the socket is drained.
    pub fn receive(&mut self) -> NetResult<usize> {
        let stream = self.stream.as_mut().expect("Connection must have a stream");

        let before = self.read_buf.len();
        let result = self.read_buf.ingress(&mut *stream);
        let received = self.read_buf.len() - before;

        if received > 0 {
            self.handle.add_bytes_received(received as u64);
        }

        match result.map_err(NetError::from) {
            Ok(_) | Err(NetError::Wait) => Ok(received),
            Err(fatal) => Err(fatal),
        }
    }

    /// Consumes every complete frame currently buffered, dispatching each
    /// through the state machine. Leaves partial frames for the next read.
    pub fn process_frames<R: PacketRouter>(&mut self, router: &R) -> NetResult<()> {
        loop {
            if self.is_closing() {
                // No incoming traffic is routed while draining out.
                self.read_buf.clear();
                return Ok(());
            }

            let buffered = self.read_buf.read_slice();

            if buffered.len() < FRAME_HEADER_SIZE {
                return Ok(());
            }

            let payload_len = match parse_frame_header(&buffered[..FRAME_HEADER_SIZE]) {
                Ok(len) => len,
                Err(ProtocolError::BadMagic) => {
                    let violations = self.handle.record_header_violation();
                    logging::warn!(self.log, "frame magic violation";
                                   "context" => "process_frames",
                                   "violations" => violations);

                    if violations >= HEADER_VIOLATION_LIMIT {
                        return Err(NetError::Fatal(FatalKind::ViolationBudget));
                    }

                    // Resync: scan forward one byte at a time.
                    self.read_buf.consume(1);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if buffered.len() < FRAME_HEADER_SIZE + payload_len {
                return Ok(());
            }

            let mut completed_handshake = false;
            {
                let payload =
                    &self.read_buf.read_slice()[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len];

                match self.state {
                    ConnState::Handshaking(_) => {
                        validate_handshake(payload)?;
                        completed_handshake = true;
                    }
                    ConnState::Active => router.route(&self.handle, payload),
                    ConnState::Closing { .. } => {}
                }
            }

            self.read_buf.consume(FRAME_HEADER_SIZE + payload_len);

            if completed_handshake {
                self.state = ConnState::Active;
                logging::debug!(self.log, "handshake accepted"; "context" => "process_frames");
                router.handshake_complete(&self.handle);
            }
        }
    }

    /// Moves queued outbound packets into the write buffer. Packets that do
    /// not fit stay queued for the next pump.
    pub fn pump_send_queue(&mut self) {
        let write_buf = &mut self.write_buf;
        self.handle.drain_send(|bytes| write_buf.push_bytes(bytes));
    }

    /// Flushes the write buffer to the socket. Returns bytes written; zero
    /// with data pending means the socket is full.
    pub fn send(&mut self) -> NetResult<usize> {
        if self.write_buf.is_empty() {
            return Ok(0);
        }

        let stream = self.stream.as_mut().expect("Connection must have a stream");

        let before = self.write_buf.len();
        let result = self.write_buf.egress(&mut *stream);
        let sent = before - self.write_buf.len();

        if sent > 0 {
            self.handle.add_bytes_sent(sent as u64);
        }

        match result.map_err(NetError::from) {
            Ok(_) | Err(NetError::Wait) => Ok(sent),
            Err(fatal) => Err(fatal),
        }
    }

    /// True while any outbound bytes remain queued or staged.
    #[inline]
    pub fn has_pending_egress(&self) -> bool {
        !self.write_buf.is_empty() || self.handle.send_queue_len() > 0
    }

    /// Transition to `Closing`. Idempotent; the first reason wins.
    pub fn begin_close(&mut self, reason: DropReason, now: Instant) {
        if self.is_closing() {
            return;
        }

        logging::debug!(self.log, "connection closing";
                        "context" => "begin_close",
                        "reason" => ?reason);

        self.state = ConnState::Closing { since: now, reason };
        self.handle.set_closing();
    }

    /// Picks up a close requested by the game thread through the handle.
    pub fn sync_close_request(&mut self, now: Instant) {
        if self.handle.is_closing() && !self.is_closing() {
            let reason = self
                .handle
                .take_close_reason()
                .unwrap_or(DropReason::ClientRequest);
            self.state = ConnState::Closing { since: now, reason };
        }
    }

    /// Handshake deadline check.
    #[inline]
    pub fn handshake_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            ConnState::Handshaking(since) => now.duration_since(since) >= timeout,
            _ => false,
        }
    }

    /// Pong deadline check: a ping is outstanding and the silence exceeds
    /// the allowance.
    #[inline]
    pub fn pong_expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
        if self.state != ConnState::Active {
            return false;
        }

        let last_pong = self.handle.last_pong_ms();
        self.handle.ping_sent_ms() > last_pong && now_ms.saturating_sub(last_pong) > timeout_ms
    }

    /// While `Closing`: true once the drain finished or the deadline passed.
    pub fn drain_complete(&self, now: Instant, drain_timeout: Duration) -> bool {
        match self.state {
            ConnState::Closing { since, .. } => {
                !self.has_pending_egress() || now.duration_since(since) >= drain_timeout
            }
            _ => false,
        }
    }

    /// The reason this connection is closing, if it is.
    pub fn close_reason(&self) -> Option<DropReason> {
        match self.state {
            ConnState::Closing { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Tears the socket down. Terminal.
    pub fn shutdown_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream.shutdown(Shutdown::Both));
        }
        self.read_buf.clear();
        self.write_buf.clear();
    }
}

/// Checks a handshake payload: opcode, exact size, protocol version, client
/// magic.
fn validate_handshake(payload: &[u8]) -> Result<(), ProtocolError> {
    if payload[0] != Opcode::HandshakeRequest.to_wire() {
        return Err(ProtocolError::HandshakeExpected);
    }

    if !Opcode::HandshakeRequest.size_matches(payload.len()) {
        return Err(ProtocolError::SizeMismatch);
    }

    let mut reader = PayloadReader::new(&payload[1..]);
    let version = reader.read_u16()?;
    let magic = reader.read_u32()?;

    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch);
    }

    if magic != CLIENT_MAGIC {
        return Err(ProtocolError::MagicMismatch);
    }

    Ok(())
}

/// Folds a fatal transport error into the reason reported to the game side.
pub fn drop_reason(kind: FatalKind) -> DropReason {
    match kind {
        FatalKind::ViolationBudget => DropReason::ProtocolViolation,
        FatalKind::Protocol(ProtocolError::VersionMismatch)
        | FatalKind::Protocol(ProtocolError::MagicMismatch)
        | FatalKind::Protocol(ProtocolError::HandshakeExpected) => DropReason::HandshakeRejected,
        FatalKind::Protocol(_) => DropReason::ProtocolViolation,
        FatalKind::HandshakeTimeout => DropReason::HandshakeTimeout,
        FatalKind::PingTimeout => DropReason::PingTimeout,
        FatalKind::SendOverflow => DropReason::SendOverflow,
        FatalKind::AddrParse | FatalKind::Io(_) => DropReason::TransportError,
    }
}
