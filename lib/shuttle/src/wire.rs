//! Builders for every server-to-client message. Pure: each returns a framed,
//! ready-to-ship buffer and performs no I/O. Buffers are reference counted so
//! one broadcast payload can sit on many send queues without copying.

use crate::codec::PayloadWriter;
use crate::opcode::Opcode;
use mordant::{Facing, PlayerId};
use std::sync::Arc;

/// One entry of a `BatchPlayerSpatial` packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SpatialEntry {
    pub player_id: PlayerId,
    pub x: i16,
    pub y: i16,
    pub facing: Facing,
}

/// Wire footprint of a single spatial entry.
pub const SPATIAL_ENTRY_SIZE: usize = 13;

/// Entries per batch packet are capped by the u8 count prefix.
pub const MAX_BATCH_ENTRIES: usize = 255;

#[inline]
fn seal(writer: PayloadWriter) -> Arc<Vec<u8>> {
    // All builder payloads are bounded well below the frame envelope.
    Arc::new(writer.frame().expect("Builder payload within envelope"))
}

pub fn handshake_accepted() -> Arc<Vec<u8>> {
    seal(PayloadWriter::new(Opcode::HandshakeAccepted.to_wire()))
}

pub fn welcome(player_id: PlayerId, x: i16, y: i16, facing: Facing) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::Welcome.to_wire());
    writer
        .write_u64(player_id)
        .write_i16(x)
        .write_i16(y)
        .write_u8(facing.to_wire());

    seal(writer)
}

pub fn position_correction(x: i16, y: i16, facing: Facing) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::PositionCorrection.to_wire());
    writer.write_i16(x).write_i16(y).write_u8(facing.to_wire());

    seal(writer)
}

pub fn facing_correction(facing: Facing) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::FacingCorrection.to_wire());
    writer.write_u8(facing.to_wire());

    seal(writer)
}

/// Packs spatial entries into as many `BatchPlayerSpatial` packets as needed,
/// each holding at most [`MAX_BATCH_ENTRIES`].
pub fn batch_player_spatial(entries: &[SpatialEntry]) -> Vec<Arc<Vec<u8>>> {
    entries
        .chunks(MAX_BATCH_ENTRIES)
        .map(|chunk| {
            let mut writer = PayloadWriter::with_capacity(
                Opcode::BatchPlayerSpatial.to_wire(),
                2 + chunk.len() * SPATIAL_ENTRY_SIZE,
            );
            writer.write_u8(chunk.len() as u8);

            for entry in chunk {
                writer
                    .write_u64(entry.player_id)
                    .write_i16(entry.x)
                    .write_i16(entry.y)
                    .write_u8(entry.facing.to_wire());
            }

            seal(writer)
        })
        .collect()
}

pub fn left_game(player_id: PlayerId) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::LeftGame.to_wire());
    writer.write_u64(player_id);

    seal(writer)
}

pub fn server_shutdown(reason: u8) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::ServerShutdown.to_wire());
    writer.write_u8(reason);

    seal(writer)
}

pub fn ping_request(timestamp: u32) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::ServerPing.to_wire());
    writer.write_u32(timestamp);

    seal(writer)
}

pub fn pong_response(timestamp: u32) -> Arc<Vec<u8>> {
    let mut writer = PayloadWriter::new(Opcode::ServerPong.to_wire());
    writer.write_u32(timestamp);

    seal(writer)
}
