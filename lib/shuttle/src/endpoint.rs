use crate::client::ClientHandle;
use crate::connection::{drop_reason, ConnState, Connection};
use crate::manager::ClientManager;
use crate::support::{DropReason, NetError, NetResult, PacketRouter};
use indexmap::IndexSet;
use mordant::logging;
use mordant::time::{duration_ms, monotonic_ms};
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LISTENER_TOKEN: mio::Token = mio::Token(0);
const WAKE_TOKEN: mio::Token = mio::Token(1);
const TOKEN_OFFSET: usize = 2;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Policy knobs for the I/O thread.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub address: String,
    pub max_clients: usize,
    pub handshake_timeout: Duration,
    /// Silence allowance after an unanswered ping.
    pub ping_timeout: Duration,
    /// How long a `Closing` connection may drain its send queue.
    pub close_drain_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> EndpointConfig {
        EndpointConfig {
            address: "0.0.0.0:8080".to_string(),
            max_clients: 4096,
            handshake_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(6),
            close_drain_timeout: Duration::from_secs(3),
        }
    }
}

/// Game-thread handle used to rouse the endpoint after filling send queues.
#[derive(Clone)]
pub struct Wakeup {
    readiness: mio::SetReadiness,
}

impl Wakeup {
    #[inline]
    pub fn wake(&self) {
        // A failed wakeup only delays the flush to the next poll interval.
        drop(self.readiness.set_readiness(mio::Ready::readable()));
    }
}

/// The I/O domain: owns the listener, the poll and every live socket.
///
/// Runs on its own thread. Crossing into the game domain happens only
/// through the router (inbound) and the shared client handles (outbound);
/// nothing here touches game state.
pub struct Endpoint<R: PacketRouter> {
    listener: TcpListener,
    poll: mio::Poll,
    events: mio::Events,
    ready: Vec<(mio::Token, mio::Ready)>,
    _wake_registration: mio::Registration,

    connections: Vec<Option<Connection>>,
    free: Vec<usize>,
    live: IndexSet<usize>,

    manager: Arc<ClientManager>,
    router: R,
    running: Arc<AtomicBool>,
    shutdown_started: Option<Instant>,

    config: EndpointConfig,
    housekeeping_at: Instant,

    log: logging::Logger,
}

impl<R: PacketRouter> Endpoint<R> {
    /// Binds the listener and wires up the poll. Returns the endpoint and
    /// the wakeup handle for the game thread.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        config: EndpointConfig,
        manager: Arc<ClientManager>,
        router: R,
        running: Arc<AtomicBool>,
        log: L,
    ) -> NetResult<(Endpoint<R>, Wakeup)> {
        let log = logging::child_or_discard(log);

        let address: SocketAddr = config.address.parse()?;
        let listener = TcpListener::bind(&address)?;

        let poll = mio::Poll::new()?;
        poll.register(
            &listener,
            LISTENER_TOKEN,
            mio::Ready::readable(),
            mio::PollOpt::edge(),
        )?;

        let (wake_registration, readiness) = mio::Registration::new2();
        poll.register(
            &wake_registration,
            WAKE_TOKEN,
            mio::Ready::readable(),
            mio::PollOpt::edge(),
        )?;

        logging::info!(log, "endpoint listening"; "context" => "new", "address" => %address);

        let endpoint = Endpoint {
            listener,
            poll,
            events: mio::Events::with_capacity(8192),
            ready: Vec::new(),
            _wake_registration: wake_registration,
            connections: Vec::new(),
            free: Vec::new(),
            live: IndexSet::new(),
            manager,
            router,
            running,
            shutdown_started: None,
            config,
            housekeeping_at: Instant::now(),
            log,
        };

        Ok((endpoint, Wakeup { readiness }))
    }

    /// The local address actually bound (relevant when the config asked for
    /// port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The endpoint loop. Returns once a shutdown was requested and every
    /// connection finished draining (or hit the drain deadline).
    pub fn run(mut self) {
        logging::info!(self.log, "endpoint thread running"; "context" => "run");

        loop {
            if !self.running.load(Ordering::Acquire) {
                self.begin_shutdown();
            }

            if self.shutdown_started.is_some() && self.live.is_empty() {
                break;
            }

            self.poll
                .poll(&mut self.events, Some(POLL_INTERVAL))
                .expect("Endpoint poll failed");

            self.ready.clear();
            let ready = &mut self.ready;
            ready.extend(self.events.iter().map(|ev| (ev.token(), ev.readiness())));

            for index in 0..self.ready.len() {
                let (token, readiness) = self.ready[index];

                match token {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKE_TOKEN => {} // queues are pumped below
                    token => {
                        let slot = token.0 - TOKEN_OFFSET;

                        if readiness.is_readable() {
                            self.read_ready(slot);
                        }
                        if readiness.is_writable() {
                            self.write_ready(slot);
                        }
                    }
                }
            }

            self.pump_outbound();

            let now = Instant::now();
            if now.duration_since(self.housekeeping_at) >= HOUSEKEEPING_INTERVAL {
                self.housekeeping(now);
                self.housekeeping_at = now;
            }
        }

        logging::info!(self.log, "endpoint thread stopped"; "context" => "run");
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.shutdown_started.is_some() || self.live.len() >= self.config.max_clients
                    {
                        logging::warn!(self.log, "connection refused";
                                       "context" => "accept",
                                       "remote_addr" => %addr,
                                       "live" => self.live.len());
                        drop(stream);
                        continue;
                    }

                    let client_id = self.manager.allocate_id();
                    let handle = Arc::new(ClientHandle::new(client_id, addr, monotonic_ms()));
                    self.manager.register(handle.clone());

                    let slot = match self.free.pop() {
                        Some(slot) => slot,
                        None => {
                            self.connections.push(None);
                            self.connections.len() - 1
                        }
                    };

                    let mut conn = Connection::new(handle, Instant::now(), &self.log);
                    conn.open(stream);

                    if conn
                        .register(&self.poll, mio::Token(slot + TOKEN_OFFSET))
                        .is_err()
                    {
                        logging::warn!(self.log, "stream registration failed";
                                       "context" => "accept",
                                       "client_id" => client_id);
                        self.manager.remove(client_id);
                        self.free.push(slot);
                        continue;
                    }

                    logging::debug!(self.log, "connection accepted";
                                    "context" => "accept",
                                    "client_id" => client_id,
                                    "remote_addr" => %addr);

                    self.connections[slot] = Some(conn);
                    self.live.insert(slot);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::warn!(self.log, "accept failed";
                                   "context" => "accept",
                                   "error" => %err);
                    break;
                }
            }
        }
    }

    fn read_ready(&mut self, slot: usize) {
        let result = {
            let conn = match self.connections.get_mut(slot).and_then(Option::as_mut) {
                Some(conn) => conn,
                None => return,
            };

            Self::drive_read(conn, &self.router)
        };

        if let Err(NetError::Fatal(kind)) = result {
            self.close_connection(slot, drop_reason(kind));
        }
    }

    /// Alternates socket reads and frame processing until the socket is
    /// drained, so a full read buffer cannot stall an edge-triggered poll.
    fn drive_read(conn: &mut Connection, router: &R) -> NetResult<()> {
        loop {
            let received = conn.receive()?;
            conn.process_frames(router)?;

            if received == 0 {
                return Ok(());
            }
        }
    }

    fn write_ready(&mut self, slot: usize) {
        let result = {
            let conn = match self.connections.get_mut(slot).and_then(Option::as_mut) {
                Some(conn) => conn,
                None => return,
            };

            conn.pump_send_queue();
            conn.send()
        };

        if let Err(NetError::Fatal(kind)) = result {
            self.close_connection(slot, drop_reason(kind));
        }
    }

    /// Flushes every live connection's send queue. Runs each loop pass; a
    /// pass over idle connections is a handful of empty-queue checks.
    fn pump_outbound(&mut self) {
        let now = Instant::now();
        let mut failed: Vec<(usize, DropReason)> = Vec::new();

        for &slot in self.live.iter() {
            let conn = match self.connections[slot].as_mut() {
                Some(conn) => conn,
                None => continue,
            };

            conn.sync_close_request(now);
            conn.pump_send_queue();

            if let Err(NetError::Fatal(kind)) = conn.send() {
                failed.push((slot, drop_reason(kind)));
            }
        }

        for (slot, reason) in failed {
            self.close_connection(slot, reason);
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        let now_ms = monotonic_ms();
        let mut expired: Vec<(usize, DropReason)> = Vec::new();

        for &slot in self.live.iter() {
            let conn = match self.connections[slot].as_ref() {
                Some(conn) => conn,
                None => continue,
            };

            if conn.handshake_expired(now, self.config.handshake_timeout) {
                expired.push((slot, DropReason::HandshakeTimeout));
            } else if conn.pong_expired(now_ms, duration_ms(self.config.ping_timeout)) {
                expired.push((slot, DropReason::PingTimeout));
            } else if conn.drain_complete(now, self.config.close_drain_timeout) {
                let reason = conn.close_reason().unwrap_or(DropReason::ClientRequest);
                expired.push((slot, reason));
            }
        }

        for (slot, reason) in expired {
            self.close_connection(slot, reason);
        }
    }

    /// Marks every connection as closing. Idempotent; called once the
    /// running flag drops.
    fn begin_shutdown(&mut self) {
        if self.shutdown_started.is_some() {
            return;
        }

        let now = Instant::now();
        logging::info!(self.log, "endpoint shutting down";
                       "context" => "begin_shutdown",
                       "live" => self.live.len());

        self.shutdown_started = Some(now);

        for &slot in self.live.iter() {
            if let Some(conn) = self.connections[slot].as_mut() {
                conn.begin_close(DropReason::Shutdown, now);
            }
        }
    }

    fn close_connection(&mut self, slot: usize, reason: DropReason) {
        let mut conn = match self.connections.get_mut(slot).and_then(Option::take) {
            Some(conn) => conn,
            None => return,
        };

        let client_id = conn.handle().client_id();

        logging::debug!(self.log, "connection closed";
                        "context" => "close_connection",
                        "client_id" => client_id,
                        "reason" => ?reason);

        conn.deregister(&self.poll);
        conn.shutdown_stream();

        self.manager.remove(client_id);
        self.live.remove(&slot);
        self.free.push(slot);

        self.router.client_closed(client_id, reason);
    }
}
