//! Full-stack loopback tests: a real endpoint thread, a real game loop and
//! plain blocking TCP clients speaking the wire protocol byte for byte.

use dyecore::config::GameConfig;
use dyecore::handler::GameRouter;
use dyecore::persist::PersistHandle;
use dyecore::script::NoopHooks;
use dyecore::server::{GameServer, ServerControl};
use shuttle::endpoint::Endpoint;
use shuttle::manager::ClientManager;
use shuttle::queue::ActionQueue;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct TestServer {
    addr: SocketAddr,
    control: ServerControl,
    game_thread: Option<thread::JoinHandle<()>>,
    io_thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(mut config: GameConfig) -> TestServer {
        config.server.address = "127.0.0.1:0".to_string();

        let manager = Arc::new(ClientManager::new());
        let queue = Arc::new(ActionQueue::new(config.game.action_queue_capacity));
        let io_running = Arc::new(AtomicBool::new(true));

        let router = GameRouter::new(queue.clone(), None);
        let (endpoint, wakeup) = Endpoint::new(
            config.endpoint(),
            manager.clone(),
            router,
            io_running.clone(),
            None,
        )
        .expect("endpoint bind failed");

        let addr = endpoint.local_addr().unwrap();

        let io_thread = thread::spawn(move || endpoint.run());

        let mut server = GameServer::new(
            config,
            manager,
            queue,
            Some(wakeup),
            io_running,
            PersistHandle::disabled(),
            Box::new(NoopHooks),
            None,
        );
        let control = server.control();
        let game_thread = thread::spawn(move || server.run());

        TestServer {
            addr,
            control,
            game_thread: Some(game_thread),
            io_thread: Some(io_thread),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.control.stop();

        if let Some(handle) = self.game_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        stream.set_nodelay(true).unwrap();

        TestClient { stream }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write failed");
    }

    /// Reads one complete frame, returning the payload.
    fn read_frame(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).expect("header read failed");
        assert_eq!(&header[..2], &[0x11, 0x68], "bad frame magic from server");

        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        assert!(len >= 1 && len <= 4096);

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).expect("payload read failed");
        payload
    }

    /// Reads frames until one with the wanted opcode arrives, transparently
    /// answering server pings on the way.
    fn read_until(&mut self, opcode: u8) -> Vec<u8> {
        for _ in 0..32 {
            let payload = self.read_frame();

            if payload[0] == opcode {
                return payload;
            }

            if payload[0] == 0xF8 {
                // S_Ping_Request: echo the timestamp back as a pong.
                let mut pong = vec![0x11, 0x68, 0x00, 0x05, 0xF9];
                pong.extend_from_slice(&payload[1..5]);
                self.send(&pong);
            }
        }

        panic!("opcode {:#04x} never arrived", opcode);
    }

    /// Performs the handshake and returns `(player_id, x, y, facing)` from
    /// the welcome packet.
    fn join(&mut self) -> (u64, i16, i16, u8) {
        // Exact join bytes: frame, handshake opcode, version 1, "DYEW".
        self.send(&[
            0x11, 0x68, 0x00, 0x07, 0x00, 0x00, 0x01, 0x44, 0x59, 0x45, 0x57,
        ]);

        let accepted = self.read_frame();
        assert_eq!(accepted, vec![0xF0]);

        let welcome = self.read_until(0x10);
        assert_eq!(welcome.len(), 14);

        let mut id = [0u8; 8];
        id.copy_from_slice(&welcome[1..9]);
        let x = i16::from_be_bytes([welcome[9], welcome[10]]);
        let y = i16::from_be_bytes([welcome[11], welcome[12]]);

        (u64::from_be_bytes(id), x, y, welcome[13])
    }

    fn send_move(&mut self, direction: u8, facing: u8) {
        self.send(&[0x11, 0x68, 0x00, 0x03, 0x01, direction, facing]);
    }

    fn send_turn(&mut self, direction: u8) {
        self.send(&[0x11, 0x68, 0x00, 0x02, 0x02, direction]);
    }
}

fn fast_config() -> GameConfig {
    let mut config = GameConfig::default();
    config.game.fps = 50;
    config.game.move_cooldown_ms = 0;
    config.server.ping_interval_ms = 10_000;
    config
}

#[test]
fn join_sequence_returns_accept_then_welcome() {
    let mut config = fast_config();
    config.map.width = 8;
    config.map.height = 8;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    let (player_id, x, y, facing) = client.join();

    assert_ne!(player_id, 0, "zero is the reserved null player id");
    assert!(x >= 0 && x < 8);
    assert!(y >= 0 && y < 8);
    assert!(facing <= 3);
}

#[test]
fn handshake_with_wrong_magic_is_rejected() {
    let mut config = fast_config();
    config.map.width = 4;
    config.map.height = 4;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    // Last magic byte corrupted: "DYEX".
    client.send(&[
        0x11, 0x68, 0x00, 0x07, 0x00, 0x00, 0x01, 0x44, 0x59, 0x45, 0x58,
    ]);

    // The server drops the connection without an accept; a read timeout
    // means it neither answered nor closed, which is also a failure.
    let mut buf = [0u8; 16];
    let closed = match client.stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            false
        }
        Err(_) => true,
    };
    assert!(closed, "server answered a rejected handshake");
}

#[test]
fn blocked_move_gets_position_correction() {
    let mut config = fast_config();
    // Single tile: the only player always spawns at (0, 0) and every move
    // is out of bounds.
    config.map.width = 1;
    config.map.height = 1;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    let (_, x, y, _) = client.join();
    assert_eq!((x, y), (0, 0));

    // Face west first so the facing gate passes, then step into the void.
    client.send_turn(3);
    client.send_move(3, 3);

    let correction = client.read_until(0x11);
    assert_eq!(correction, vec![0x11, 0x00, 0x00, 0x00, 0x00, 0x03]);
}

#[test]
fn wrong_facing_gets_facing_correction() {
    let mut config = fast_config();
    config.map.width = 1;
    config.map.height = 1;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    client.join();

    // Authoritative facing is north (spawn); request a move south while
    // claiming to face east.
    client.send_move(2, 1);

    let correction = client.read_until(0x12);
    assert_eq!(correction, vec![0x12, 0x00]);
}

#[test]
fn move_success_is_broadcast_to_viewer() {
    let mut config = fast_config();
    // A 3x1 corridor: two players occupy two cells, one cell stays free.
    config.map.width = 3;
    config.map.height = 1;
    let server = TestServer::start(config);

    let mut first = TestClient::connect(server.addr);
    let (first_id, first_x, _, _) = first.join();

    let mut second = TestClient::connect(server.addr);
    let (second_id, second_x, _, _) = second.join();
    assert_ne!(first_x, second_x);

    // The joiner is announced to the earlier player, and the joiner is
    // told about everyone already in range. Drain both announcements so
    // the next batch frame is the move broadcast.
    let batch = first.read_until(0x25);
    assert_eq!(batch[1], 1);
    let mut id = [0u8; 8];
    id.copy_from_slice(&batch[2..10]);
    assert_eq!(u64::from_be_bytes(id), second_id);
    second.read_until(0x25);

    // Whichever player is adjacent to the free cell steps into it.
    let free_x = (0..3i16).find(|x| *x != first_x && *x != second_x).unwrap();
    let (mover, mover_id, mover_x, observer) = if (first_x - free_x).abs() == 1 {
        (&mut first, first_id, first_x, &mut second)
    } else {
        (&mut second, second_id, second_x, &mut first)
    };
    let direction = if free_x > mover_x { 1 } else { 3 };

    mover.send_turn(direction);
    mover.send_move(direction, direction);

    let batch = observer.read_until(0x25);
    assert_eq!(batch[1], 1);
    let mut id = [0u8; 8];
    id.copy_from_slice(&batch[2..10]);
    assert_eq!(u64::from_be_bytes(id), mover_id);

    let x = i16::from_be_bytes([batch[10], batch[11]]);
    let y = i16::from_be_bytes([batch[12], batch[13]]);
    assert_eq!((x, y), (free_x, 0));
    assert_eq!(batch[14], direction);
}

#[test]
fn occupied_tile_rejects_mover() {
    let mut config = fast_config();
    // Two cells, two players: every move lands on the other player or a
    // wall.
    config.map.width = 2;
    config.map.height = 1;
    let server = TestServer::start(config);

    let mut first = TestClient::connect(server.addr);
    let (_, first_x, _, _) = first.join();

    let mut second = TestClient::connect(server.addr);
    second.join();

    let direction = if first_x == 0 { 1 } else { 3 };
    first.send_turn(direction);
    first.send_move(direction, direction);

    let correction = first.read_until(0x11);
    let x = i16::from_be_bytes([correction[1], correction[2]]);
    assert_eq!(x, first_x, "player must not have moved");
}

#[test]
fn disconnect_notifies_viewers() {
    let mut config = fast_config();
    config.map.width = 2;
    config.map.height = 1;
    let server = TestServer::start(config);

    let mut first = TestClient::connect(server.addr);
    first.join();

    let mut second = TestClient::connect(server.addr);
    let (second_id, _, _, _) = second.join();

    // Wait until the first player has been told about the second.
    first.read_until(0x25);

    // Graceful disconnect request.
    second.send(&[0x11, 0x68, 0x00, 0x01, 0xFE]);

    let left = first.read_until(0x26);
    let mut id = [0u8; 8];
    id.copy_from_slice(&left[1..9]);
    assert_eq!(u64::from_be_bytes(id), second_id);
}

#[test]
fn client_ping_is_echoed() {
    let mut config = fast_config();
    config.map.width = 4;
    config.map.height = 4;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    client.join();

    client.send(&[0x11, 0x68, 0x00, 0x05, 0xF6, 0xAB, 0xCD, 0xEF, 0x01]);

    let pong = client.read_until(0xF7);
    assert_eq!(pong, vec![0xF7, 0xAB, 0xCD, 0xEF, 0x01]);
}

#[test]
fn server_ping_measures_rtt() {
    let mut config = fast_config();
    config.map.width = 4;
    config.map.height = 4;
    // Aggressive cadence so the test sees a ping quickly.
    config.server.ping_interval_ms = 100;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    client.join();

    let ping = client.read_until(0xF8);
    assert_eq!(ping.len(), 5);

    // Echo it back; the server folds the RTT into its smoothing window.
    let mut pong = vec![0x11, 0x68, 0x00, 0x05, 0xF9];
    pong.extend_from_slice(&ping[1..5]);
    client.send(&pong);

    // A second ping proves the connection survived the pong bookkeeping.
    client.read_until(0xF8);
}

#[test]
fn shutdown_broadcast_reaches_clients() {
    let mut config = fast_config();
    config.map.width = 4;
    config.map.height = 4;
    let server = TestServer::start(config);

    let mut client = TestClient::connect(server.addr);
    client.join();

    server.control.stop();

    let shutdown = client.read_until(0xF2);
    assert_eq!(shutdown, vec![0xF2, 0x00]);
}
