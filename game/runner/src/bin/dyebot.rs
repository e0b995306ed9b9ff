//! Headless load-test client: connects a swarm of bots that handshake,
//! answer pings and random-walk the map. Useful for eyeballing broadcast
//! fan-out and tick timings on a running server.

use clap::{App, Arg};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

const FRAME_MAGIC: [u8; 2] = [0x11, 0x68];

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&FRAME_MAGIC);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

fn run_bot(address: String, bot: usize, interval: Duration) {
    let mut stream = match TcpStream::connect(&address) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("bot {}: connect failed: {}", bot, err);
            return;
        }
    };
    stream.set_nodelay(true).ok();
    stream
        .set_read_timeout(Some(Duration::from_millis(10)))
        .ok();

    // Handshake: version 1, client magic "DYEW".
    if stream
        .write_all(&frame(&[0x00, 0x00, 0x01, 0x44, 0x59, 0x45, 0x57]))
        .is_err()
    {
        return;
    }

    let mut facing = 0u8;
    let mut inbound = [0u8; 4096];

    loop {
        // Drain whatever the server sent, answering pings.
        loop {
            let mut header = [0u8; 4];
            match stream.read_exact(&mut header) {
                Ok(()) => {}
                Err(_) => break,
            }

            let len = u16::from_be_bytes([header[2], header[3]]) as usize;
            if len == 0 || len > inbound.len() || stream.read_exact(&mut inbound[..len]).is_err() {
                return;
            }

            match inbound[0] {
                // S_Ping_Request: echo as C_Pong_Response.
                0xF8 => {
                    let mut pong = [0xF9, 0, 0, 0, 0];
                    pong[1..5].copy_from_slice(&inbound[1..5]);
                    if stream.write_all(&frame(&pong)).is_err() {
                        return;
                    }
                }
                // S_ServerShutdown
                0xF2 => return,
                _ => {}
            }
        }

        // Turn, then step, in a slow clockwise drift.
        facing = (facing + 1) % 4;
        let turn = frame(&[0x02, facing]);
        let step = frame(&[0x01, facing, facing]);

        if stream.write_all(&turn).is_err() || stream.write_all(&step).is_err() {
            return;
        }

        thread::sleep(interval);
    }
}

fn main() {
    let matches = App::new("DyeWars Bot Swarm")
        .version("1.0")
        .author("Dye Works Collective")
        .about("Connects headless clients to a DyeWars server for load testing.")
        .arg(
            Arg::with_name("address")
                .long("address")
                .takes_value(true)
                .default_value("127.0.0.1:8080"),
        )
        .arg(
            Arg::with_name("bots")
                .long("bots")
                .takes_value(true)
                .default_value("50"),
        )
        .arg(
            Arg::with_name("interval_ms")
                .long("interval-ms")
                .takes_value(true)
                .default_value("250")
                .help("Delay between move attempts per bot"),
        )
        .get_matches();

    let address = matches.value_of("address").unwrap().to_string();
    let bots: usize = matches.value_of("bots").unwrap().parse().expect("bot count");
    let interval_ms: u64 = matches
        .value_of("interval_ms")
        .unwrap()
        .parse()
        .expect("interval");
    let interval = Duration::from_millis(interval_ms);

    println!("connecting {} bots to {}", bots, address);

    let handles: Vec<_> = (0..bots)
        .map(|bot| {
            let address = address.clone();
            // Stagger connects so the accept queue is not slammed at once.
            thread::sleep(Duration::from_millis(5));
            thread::spawn(move || run_bot(address, bot, interval))
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}
