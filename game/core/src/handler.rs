use crate::action::Action;
use mordant::logging;
use mordant::ClientId;
use shuttle::client::ClientHandle;
use shuttle::codec::PayloadReader;
use shuttle::opcode::Opcode;
use shuttle::queue::ActionQueue;
use shuttle::support::{DropReason, PacketRouter, ProtocolError};
use shuttle::wire;
use std::sync::Arc;

/// Incoming packet handler: maps framed payloads onto typed actions for the
/// game thread.
///
/// Runs on the I/O thread. Never touches game state: malformed packets are
/// logged and counted against the connection, valid ones become exactly one
/// queue entry. The single exception is the client-initiated ping, which is
/// answered in place because the echo needs no game data.
pub struct GameRouter {
    queue: Arc<ActionQueue<Action>>,
    log: logging::Logger,
}

impl GameRouter {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        queue: Arc<ActionQueue<Action>>,
        log: L,
    ) -> GameRouter {
        GameRouter {
            queue,
            log: logging::child_or_discard(log),
        }
    }

    fn enqueue(&self, client: &Arc<ClientHandle>, action: Action) {
        if !self.queue.push(client.client_id(), action) {
            logging::error!(self.log, "action queue saturated, dropping client";
                            "context" => "enqueue",
                            "client_id" => client.client_id());
            client.request_close(DropReason::ActionOverflow);
        }
    }

    fn reject(&self, client: &Arc<ClientHandle>, payload: &[u8], error: ProtocolError) {
        let invalid = client.record_invalid_packet();

        logging::warn!(self.log, "invalid packet";
                       "context" => "route",
                       "client_id" => client.client_id(),
                       "opcode" => payload[0],
                       "len" => payload.len(),
                       "error" => ?error,
                       "invalid_total" => invalid);
    }

    /// Decodes one payload into at most one action. `None` means the packet
    /// was consumed without producing game work.
    fn decode(
        &self,
        client: &Arc<ClientHandle>,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<Option<Action>, ProtocolError> {
        let mut reader = PayloadReader::new(&payload[1..]);

        let action = match opcode {
            Opcode::MoveRequest => Some(Action::Move {
                direction: reader.read_u8()?,
                facing: reader.read_u8()?,
            }),
            Opcode::TurnRequest => Some(Action::Turn {
                direction: reader.read_u8()?,
            }),
            Opcode::InteractRequest => Some(Action::Interact),
            Opcode::AttackRequest => {
                // Reserved opcode: accepted, carries no behavior yet.
                None
            }
            Opcode::ClientPing => {
                // Pure echo; answered from the I/O thread.
                let timestamp = reader.read_u32()?;
                client.enqueue(wire::pong_response(timestamp));
                None
            }
            Opcode::ClientPong => Some(Action::Pong {
                timestamp: reader.read_u32()?,
            }),
            Opcode::DisconnectRequest => Some(Action::Disconnect {
                reason: DropReason::ClientRequest,
            }),
            // A handshake after activation, or any server-bound opcode, is
            // a protocol violation.
            _ => return Err(ProtocolError::UnknownOpcode(opcode.to_wire())),
        };

        Ok(action)
    }
}

impl PacketRouter for GameRouter {
    fn handshake_complete(&self, client: &Arc<ClientHandle>) {
        logging::debug!(self.log, "client handshake complete";
                        "context" => "handshake_complete",
                        "client_id" => client.client_id());
        self.enqueue(client, Action::Join);
    }

    fn route(&self, client: &Arc<ClientHandle>, payload: &[u8]) {
        debug_assert!(!payload.is_empty());

        let opcode = match Opcode::from_wire(payload[0]) {
            Ok(opcode) => opcode,
            Err(error) => return self.reject(client, payload, error),
        };

        if !opcode.size_matches(payload.len()) {
            return self.reject(client, payload, ProtocolError::SizeMismatch);
        }

        match self.decode(client, opcode, payload) {
            Ok(Some(action)) => self.enqueue(client, action),
            Ok(None) => {}
            Err(error) => self.reject(client, payload, error),
        }
    }

    fn client_closed(&self, client_id: ClientId, reason: DropReason) {
        logging::debug!(self.log, "client closed";
                        "context" => "client_closed",
                        "client_id" => client_id,
                        "reason" => ?reason);

        // Disconnects must reach the game thread even when the queue is at
        // capacity, or the player entity would leak.
        self.queue
            .push_critical(client_id, Action::Disconnect { reason });
    }
}

/// Round trip for a pong that echoes `timestamp`, measured on the monotonic
/// millisecond clock. A stale or garbage echo saturates to zero.
#[inline]
pub fn pong_rtt_ms(timestamp: u32, now_ms: u64) -> u64 {
    now_ms.saturating_sub(u64::from(timestamp))
}
