use crate::action::Action;
use crate::config::GameConfig;
use crate::handler::pong_rtt_ms;
use crate::persist::PersistHandle;
use crate::player::MoveResult;
use crate::registry::PlayerRegistry;
use crate::script::GameHooks;
use crate::spatial::SpatialHash;
use crate::stats::{StatsPublisher, StatsSnapshot};
use crate::tilemap::TileMap;
use crate::visibility::VisibilityTracker;
use hashbrown::{HashMap, HashSet};
use mordant::logging;
use mordant::time::monotonic_ms;
use mordant::{ClientId, Facing, PlayerId, NO_PLAYER};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shuttle::client::{ClientHandle, EnqueueResult};
use shuttle::endpoint::Wakeup;
use shuttle::manager::ClientManager;
use shuttle::queue::ActionQueue;
use shuttle::support::DropReason;
use shuttle::wire::{self, SpatialEntry};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Shutdown reason byte carried by `S_ServerShutdown`.
const SHUTDOWN_NORMAL: u8 = 0;

/// Random spawn probes before falling back to a full scan.
const SPAWN_ATTEMPTS: usize = 128;

/// Cross-thread stop switch for the game loop.
#[derive(Clone)]
pub struct ServerControl {
    running: Arc<AtomicBool>,
}

impl ServerControl {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// The authoritative simulation: world, registry, visibility and the tick
/// loop driving them.
///
/// Owned by exactly one thread. Input arrives through the action queue,
/// output leaves through the per-connection send queues; nothing else
/// crosses the domain boundary.
pub struct GameServer {
    config: GameConfig,
    map: TileMap,
    spatial: SpatialHash,
    visibility: VisibilityTracker,
    registry: PlayerRegistry,

    queue: Arc<ActionQueue<Action>>,
    manager: Arc<ClientManager>,
    wakeup: Option<Wakeup>,
    stats: Arc<StatsPublisher>,
    persist: PersistHandle,
    hooks: Box<dyn GameHooks>,

    running: Arc<AtomicBool>,
    io_running: Arc<AtomicBool>,

    tick: u64,
    tick_overruns: u64,
    ping_interval_ticks: u64,
    persist_interval_ticks: u64,
    pending_wake: bool,
    game_thread: Option<thread::ThreadId>,
    rng: StdRng,

    // Per-tick scratch, reused to keep the hot path allocation-free once
    // warmed up.
    drain_buf: Vec<(ClientId, Action)>,
    action_counts: HashMap<ClientId, u32>,
    dirty_buf: Vec<PlayerId>,
    candidates: HashSet<PlayerId>,
    entered_buf: Vec<PlayerId>,
    left_buf: Vec<PlayerId>,
    observers_buf: Vec<PlayerId>,
    batches: HashMap<PlayerId, Vec<SpatialEntry>>,
    singles: HashMap<PlayerId, Vec<Arc<Vec<u8>>>>,
    viewer_clients: Vec<ClientId>,
    lookup: HashMap<ClientId, Arc<ClientHandle>>,

    log: logging::Logger,
}

impl GameServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        config: GameConfig,
        manager: Arc<ClientManager>,
        queue: Arc<ActionQueue<Action>>,
        wakeup: Option<Wakeup>,
        io_running: Arc<AtomicBool>,
        persist: PersistHandle,
        hooks: Box<dyn GameHooks>,
        log: L,
    ) -> GameServer {
        let map = TileMap::with_walls(config.map.width, config.map.height, &config.map.walls);
        let spatial = SpatialHash::new(config.map.width, config.map.height, config.game.view_range);

        let tick_ms = mordant::time::duration_ms(config.tick_duration()).max(1);
        let ping_interval_ticks = (config.server.ping_interval_ms / tick_ms).max(1);
        let persist_interval_ticks = (config.game.persist_interval_secs * 1000 / tick_ms).max(1);

        GameServer {
            map,
            spatial,
            visibility: VisibilityTracker::new(),
            registry: PlayerRegistry::new(),
            queue,
            manager,
            wakeup,
            stats: Arc::new(StatsPublisher::new()),
            persist,
            hooks,
            running: Arc::new(AtomicBool::new(true)),
            io_running,
            tick: 0,
            tick_overruns: 0,
            ping_interval_ticks,
            persist_interval_ticks,
            pending_wake: false,
            game_thread: None,
            rng: StdRng::from_entropy(),
            drain_buf: Vec::new(),
            action_counts: HashMap::new(),
            dirty_buf: Vec::new(),
            candidates: HashSet::new(),
            entered_buf: Vec::new(),
            left_buf: Vec::new(),
            observers_buf: Vec::new(),
            batches: HashMap::new(),
            singles: HashMap::new(),
            viewer_clients: Vec::new(),
            lookup: HashMap::new(),
            log: logging::child_or_discard(log),
            config,
        }
    }

    pub fn control(&self) -> ServerControl {
        ServerControl {
            running: self.running.clone(),
        }
    }

    pub fn stats(&self) -> Arc<StatsPublisher> {
        self.stats.clone()
    }

    /// Runs the fixed-rate tick loop until stopped, then performs the
    /// shutdown broadcast and releases the I/O thread.
    pub fn run(&mut self) {
        let tick_duration = self.config.tick_duration();

        logging::info!(self.log, "game loop running";
                       "context" => "run",
                       "fps" => self.config.game.fps,
                       "view_range" => self.config.game.view_range);

        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            self.tick(started);

            let elapsed = started.elapsed();
            if elapsed >= tick_duration {
                // Overruns are recorded; the next tick starts immediately,
                // there is no catch-up.
                self.tick_overruns += 1;
                logging::debug!(self.log, "tick overran its budget";
                                "context" => "run",
                                "tick" => self.tick,
                                "elapsed" => ?elapsed);
            } else {
                thread::sleep(tick_duration - elapsed);
            }
        }

        self.shutdown();
    }

    /// One simulation step: drain actions, compute broadcasts, run the
    /// periodic work, publish stats.
    pub fn tick(&mut self, now: Instant) {
        self.assert_game_thread();

        self.tick += 1;

        let actions_processed = self.drain_actions(now);

        let broadcast_started = Instant::now();
        let dirty_players = self.broadcast();
        let broadcast_us = broadcast_started.elapsed().as_micros() as u64;

        if self.tick % self.ping_interval_ticks == 0 {
            self.send_pings();
        }

        if self.tick % self.persist_interval_ticks == 0 {
            self.persist_positions();
        }

        let tick_us = now.elapsed().as_micros() as u64;
        self.publish_stats(actions_processed, dirty_players, tick_us, broadcast_us);

        if self.pending_wake {
            self.pending_wake = false;
            if let Some(wakeup) = self.wakeup.as_ref() {
                wakeup.wake();
            }
        }
    }

    fn drain_actions(&mut self, now: Instant) -> usize {
        let mut drained = mem::take(&mut self.drain_buf);
        self.queue.drain_into(&mut drained);

        let processed = drained.len();
        let limit = self.config.game.max_actions_per_tick;
        self.action_counts.clear();

        for (client_id, action) in drained.drain(..) {
            let count = {
                let count = self.action_counts.entry(client_id).or_insert(0);
                *count += 1;
                *count
            };

            // Flooding clients lose their surplus actions and the
            // connection; disconnects are always honored so the player
            // cannot leak.
            if count > limit && !matches!(action, Action::Disconnect { .. }) {
                if count == limit + 1 {
                    logging::warn!(self.log, "client exceeded per-tick action budget";
                                   "context" => "drain_actions",
                                   "client_id" => client_id,
                                   "limit" => limit);
                    if let Some(handle) = self.manager.get(client_id) {
                        handle.request_close(DropReason::ActionOverflow);
                    }
                }
                continue;
            }

            self.execute_action(client_id, action, now);
        }

        self.drain_buf = drained;
        processed
    }

    fn execute_action(&mut self, client_id: ClientId, action: Action, now: Instant) {
        match action {
            Action::Join => self.handle_join(client_id),
            Action::Move { direction, facing } => {
                self.handle_move(client_id, direction, facing, now)
            }
            Action::Turn { direction } => self.handle_turn(client_id, direction),
            Action::Interact => {
                if let Some(player_id) = self.registry.player_id_of(client_id) {
                    self.call_hook(|hooks| hooks.on_player_interact(player_id));
                }
            }
            Action::Pong { timestamp } => self.handle_pong(client_id, timestamp),
            Action::Disconnect { reason } => self.handle_disconnect(client_id, reason),
            Action::Custom(work) => work(self),
        }
    }

    fn handle_join(&mut self, client_id: ClientId) {
        // A duplicate join for a bound client is a stale action; ignore it.
        if self.registry.player_id_of(client_id).is_some() {
            return;
        }

        let handle = match self.manager.get(client_id) {
            Some(handle) => handle,
            // Connection already gone; the disconnect action will follow.
            None => return,
        };

        let (x, y) = match self.find_spawn() {
            Some(spawn) => spawn,
            None => {
                logging::error!(self.log, "no spawn tile available";
                                "context" => "handle_join",
                                "client_id" => client_id);
                handle.request_close(DropReason::Shutdown);
                return;
            }
        };

        let player_id = self.registry.create_player(client_id, x, y, Facing::North);

        if let Err(err) = self.spatial.add(player_id, x, y) {
            logging::error!(self.log, "spawn failed to enter spatial hash";
                            "context" => "handle_join",
                            "player_id" => player_id,
                            "error" => ?err);
        }
        self.registry.mark_dirty(player_id);

        self.send_to_handle(&handle, wire::handshake_accepted());
        self.send_to_handle(&handle, wire::welcome(player_id, x, y, Facing::North));

        logging::info!(self.log, "player joined";
                       "context" => "handle_join",
                       "client_id" => client_id,
                       "player_id" => player_id,
                       "x" => x,
                       "y" => y);

        self.call_hook(|hooks| hooks.on_player_joined(player_id, x, y));
    }

    fn handle_move(&mut self, client_id: ClientId, direction: u8, facing: u8, now: Instant) {
        let player_id = match self.registry.player_id_of(client_id) {
            Some(player_id) => player_id,
            // Stale action for an unbound client: no-op by design.
            None => return,
        };

        let ping_ms = self
            .manager
            .get(client_id)
            .map(|handle| handle.ping_ms())
            .unwrap_or(0);
        let cooldown = self.config.move_cooldown();

        let (result, x, y, authoritative_facing) = {
            let spatial = &self.spatial;
            let map = &self.map;

            let player = match self.registry.get_mut(player_id) {
                Some(player) => player,
                None => return,
            };

            let result = player.attempt_move(
                direction,
                facing,
                map,
                cooldown,
                ping_ms,
                |x, y| spatial.is_occupied(x, y, player_id),
                now,
            );

            let (x, y) = player.position();
            (result, x, y, player.facing())
        };

        match result {
            MoveResult::Success => {
                // The hash is told after the position is committed; it finds
                // the old cell through its own key table.
                if let Err(err) = self.spatial.update(player_id, x, y) {
                    logging::error!(self.log, "spatial update failed";
                                    "context" => "handle_move",
                                    "player_id" => player_id,
                                    "error" => ?err);
                }

                self.registry.mark_dirty(player_id);
                self.call_hook(|hooks| hooks.on_player_moved(player_id, x, y, authoritative_facing));
            }
            MoveResult::WrongFacing => {
                self.send_to_client(client_id, wire::facing_correction(authoritative_facing));
            }
            MoveResult::InvalidDirection
            | MoveResult::OnCooldown
            | MoveResult::Blocked
            | MoveResult::OccupiedByPlayer => {
                self.send_to_client(client_id, wire::position_correction(x, y, authoritative_facing));
            }
        }
    }

    fn handle_turn(&mut self, client_id: ClientId, direction: u8) {
        let player_id = match self.registry.player_id_of(client_id) {
            Some(player_id) => player_id,
            None => return,
        };

        let turned = match self.registry.get_mut(player_id) {
            Some(player) => player.attempt_turn(direction).map(|_| player.facing()),
            None => return,
        };

        match turned {
            Some(_) => self.registry.mark_dirty(player_id),
            None => {
                let facing = self
                    .registry
                    .get(player_id)
                    .map(|player| player.facing())
                    .unwrap_or(Facing::North);
                self.send_to_client(client_id, wire::facing_correction(facing));
            }
        }
    }

    fn handle_pong(&mut self, client_id: ClientId, timestamp: u32) {
        if let Some(handle) = self.manager.get(client_id) {
            let now_ms = monotonic_ms();
            handle.record_pong(pong_rtt_ms(timestamp, now_ms), now_ms);
        }
    }

    fn handle_disconnect(&mut self, client_id: ClientId, reason: DropReason) {
        let player_id = match self.registry.player_id_of(client_id) {
            Some(player_id) => player_id,
            None => {
                // Never bound to a player; just make sure the socket goes.
                if let Some(handle) = self.manager.get(client_id) {
                    handle.request_close(reason);
                }
                return;
            }
        };

        // Tell everyone who currently sees this player, before the edges
        // are severed.
        let mut observers = mem::take(&mut self.observers_buf);
        self.visibility.observers_of(player_id, &mut observers);

        let mut viewer_clients = mem::take(&mut self.viewer_clients);
        viewer_clients.clear();
        for &observer in &observers {
            if let Some(player) = self.registry.get(observer) {
                viewer_clients.push(player.client_id());
            }
        }

        let mut lookup = mem::take(&mut self.lookup);
        self.manager.batch_lookup(&viewer_clients, &mut lookup);

        let notice = wire::left_game(player_id);
        for handle in lookup.values() {
            let handle = handle.clone();
            self.send_to_handle(&handle, notice.clone());
        }

        self.observers_buf = observers;
        self.viewer_clients = viewer_clients;
        self.lookup = lookup;

        self.visibility.remove_player(player_id);
        if let Err(err) = self.spatial.remove(player_id) {
            logging::warn!(self.log, "player missing from spatial hash";
                           "context" => "handle_disconnect",
                           "player_id" => player_id,
                           "error" => ?err);
        }

        if let Some(player) = self.registry.remove(player_id) {
            let (x, y) = player.position();
            self.persist.save_position(player_id, x, y);
        }

        if let Some(handle) = self.manager.get(client_id) {
            handle.request_close(reason);
            self.pending_wake = true;
        }

        logging::info!(self.log, "player left";
                       "context" => "handle_disconnect",
                       "client_id" => client_id,
                       "player_id" => player_id,
                       "reason" => ?reason);

        self.call_hook(|hooks| hooks.on_player_left(player_id));
    }

    /// Spatial fan-out for every player marked dirty this tick. Returns the
    /// dirty count.
    fn broadcast(&mut self) -> usize {
        let mut dirty = mem::take(&mut self.dirty_buf);
        self.registry.drain_dirty(&mut dirty);

        let dirty_count = dirty.len();
        if dirty_count == 0 {
            self.dirty_buf = dirty;
            return 0;
        }

        let mut batches = mem::take(&mut self.batches);
        let mut singles = mem::take(&mut self.singles);
        let mut entered = mem::take(&mut self.entered_buf);
        let mut left = mem::take(&mut self.left_buf);
        batches.clear();
        singles.clear();

        let view_range = self.config.game.view_range;

        for &player_id in &dirty {
            let (x, y, facing) = match self.registry.get(player_id) {
                Some(player) => {
                    let (x, y) = player.position();
                    (x, y, player.facing())
                }
                None => {
                    // Dirty id with no player: internal anomaly, skip it and
                    // keep the tick alive.
                    logging::warn!(self.log, "dirty player not in registry";
                                   "context" => "broadcast",
                                   "player_id" => player_id);
                    continue;
                }
            };

            let entry = SpatialEntry {
                player_id,
                x,
                y,
                facing,
            };

            // One range query serves both purposes: everyone in range is a
            // viewer of the dirty player and a candidate for its known set.
            self.candidates.clear();
            {
                let candidates = &mut self.candidates;
                self.spatial.for_each_in_range(x, y, view_range, |other, _, _| {
                    if other != player_id {
                        candidates.insert(other);
                        batches.entry(other).or_insert_with(Vec::new).push(entry);
                    }
                });
            }

            {
                let (entered_now, left_now) = self.visibility.update(player_id, &self.candidates);
                entered.clear();
                entered.extend_from_slice(entered_now);
                left.clear();
                left.extend_from_slice(left_now);
            }

            // Newly visible players are described to the mover; their own
            // notification about the mover already rides the viewer batch.
            for &other in &entered {
                if let Some(player) = self.registry.get(other) {
                    let (ox, oy) = player.position();
                    batches.entry(player_id).or_insert_with(Vec::new).push(SpatialEntry {
                        player_id: other,
                        x: ox,
                        y: oy,
                        facing: player.facing(),
                    });
                }
            }

            // Leave notices go both ways; the departed side would otherwise
            // keep a ghost on screen.
            for &other in &left {
                singles
                    .entry(player_id)
                    .or_insert_with(Vec::new)
                    .push(wire::left_game(other));
                singles
                    .entry(other)
                    .or_insert_with(Vec::new)
                    .push(wire::left_game(player_id));
            }
        }

        self.flush_broadcasts(&batches, &singles);

        self.dirty_buf = dirty;
        self.batches = batches;
        self.singles = singles;
        self.entered_buf = entered;
        self.left_buf = left;

        dirty_count
    }

    /// Resolves recipients and enqueues their packets. All connection
    /// lookups happen under a single lock acquisition.
    fn flush_broadcasts(
        &mut self,
        batches: &HashMap<PlayerId, Vec<SpatialEntry>>,
        singles: &HashMap<PlayerId, Vec<Arc<Vec<u8>>>>,
    ) {
        let mut viewer_clients = mem::take(&mut self.viewer_clients);
        viewer_clients.clear();

        for &viewer in batches.keys().chain(singles.keys()) {
            if let Some(player) = self.registry.get(viewer) {
                viewer_clients.push(player.client_id());
            }
        }

        let mut lookup = mem::take(&mut self.lookup);
        self.manager.batch_lookup(&viewer_clients, &mut lookup);

        for (&viewer, entries) in batches.iter() {
            let handle = match self.handle_of(viewer, &lookup) {
                Some(handle) => handle,
                None => continue,
            };

            for packet in wire::batch_player_spatial(entries) {
                self.send_to_handle(&handle, packet);
            }
        }

        for (&viewer, packets) in singles.iter() {
            let handle = match self.handle_of(viewer, &lookup) {
                Some(handle) => handle,
                None => continue,
            };

            for packet in packets {
                self.send_to_handle(&handle, packet.clone());
            }
        }

        self.viewer_clients = viewer_clients;
        self.lookup = lookup;
    }

    fn handle_of(
        &self,
        player_id: PlayerId,
        lookup: &HashMap<ClientId, Arc<ClientHandle>>,
    ) -> Option<Arc<ClientHandle>> {
        let client_id = self.registry.get(player_id)?.client_id();
        lookup.get(&client_id).cloned()
    }

    /// Queues ping requests for every connection bound to a player.
    fn send_pings(&mut self) {
        let now_ms = monotonic_ms();
        let packet = wire::ping_request(now_ms as u32);

        let mut viewer_clients = mem::take(&mut self.viewer_clients);
        viewer_clients.clear();
        viewer_clients.extend(self.registry.iter().map(|player| player.client_id()));

        let mut lookup = mem::take(&mut self.lookup);
        self.manager.batch_lookup(&viewer_clients, &mut lookup);

        for handle in lookup.values() {
            let handle = handle.clone();
            handle.record_ping_sent(now_ms);
            self.send_to_handle(&handle, packet.clone());
        }

        self.viewer_clients = viewer_clients;
        self.lookup = lookup;
    }

    fn persist_positions(&mut self) {
        for player in self.registry.iter() {
            let (x, y) = player.position();
            self.persist.save_position(player.player_id(), x, y);
        }
    }

    fn publish_stats(
        &mut self,
        actions_processed: usize,
        dirty_players: usize,
        tick_us: u64,
        broadcast_us: u64,
    ) {
        let (bytes_sent, bytes_received) = self.manager.byte_totals();

        self.stats.publish(StatsSnapshot {
            seq: 0, // assigned by the publisher
            tick: self.tick,
            tick_us,
            tick_overruns: self.tick_overruns,
            actions_processed,
            queued_actions: self.queue.len(),
            dirty_players,
            broadcast_us,
            players: self.registry.len(),
            connections: self.manager.len(),
            bytes_sent,
            bytes_received,
        });
    }

    fn shutdown(&mut self) {
        logging::info!(self.log, "game loop stopping";
                       "context" => "shutdown",
                       "players" => self.registry.len());

        let notice = wire::server_shutdown(SHUTDOWN_NORMAL);
        self.manager.for_each(|handle| {
            drop(handle.enqueue(notice.clone()));
        });

        // Release the I/O thread; it drains the shutdown notices and closes
        // every socket before exiting.
        self.io_running.store(false, Ordering::Release);
        if let Some(wakeup) = self.wakeup.as_ref() {
            wakeup.wake();
        }
    }

    fn send_to_client(&mut self, client_id: ClientId, packet: Arc<Vec<u8>>) {
        if let Some(handle) = self.manager.get(client_id) {
            self.send_to_handle(&handle, packet);
        }
    }

    fn send_to_handle(&mut self, handle: &Arc<ClientHandle>, packet: Arc<Vec<u8>>) {
        match handle.enqueue(packet) {
            EnqueueResult::Queued => self.pending_wake = true,
            EnqueueResult::Closing => {}
            EnqueueResult::Overflow => {
                logging::warn!(self.log, "send queue overflow, dropping client";
                               "context" => "send_to_handle",
                               "client_id" => handle.client_id());
                handle.request_close(DropReason::SendOverflow);
            }
        }
    }

    fn find_spawn(&mut self) -> Option<(i16, i16)> {
        let width = self.map.width();
        let height = self.map.height();

        for _ in 0..SPAWN_ATTEMPTS {
            let x = self.rng.gen_range(0..width);
            let y = self.rng.gen_range(0..height);

            if !self.map.is_blocked(x, y) && !self.spatial.is_occupied(x, y, NO_PLAYER) {
                return Some((x, y));
            }
        }

        for y in 0..height {
            for x in 0..width {
                if !self.map.is_blocked(x, y) && !self.spatial.is_occupied(x, y, NO_PLAYER) {
                    return Some((x, y));
                }
            }
        }

        None
    }

    /// Hooks are best-effort: a panicking hook is logged and the tick
    /// continues.
    fn call_hook<F: FnOnce(&dyn GameHooks)>(&self, f: F) {
        let hooks = self.hooks.as_ref();

        if catch_unwind(AssertUnwindSafe(|| f(hooks))).is_err() {
            logging::warn!(self.log, "game hook panicked"; "context" => "call_hook");
        }
    }

    #[inline]
    fn assert_game_thread(&mut self) {
        if cfg!(debug_assertions) {
            let current = thread::current().id();
            match self.game_thread {
                Some(owner) => {
                    debug_assert_eq!(owner, current, "Game state touched off the game thread")
                }
                None => self.game_thread = Some(current),
            }
        }
    }

    // Read access for tests and the runner's startup logging.

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    pub fn map(&self) -> &TileMap {
        &self.map
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }
}
