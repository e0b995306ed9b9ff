use clap::{App, Arg};
use dyecore::config::GameConfig;
use dyecore::handler::GameRouter;
use dyecore::persist::persist_channel;
use dyecore::script::NoopHooks;
use dyecore::server::GameServer;
use mordant::logging;
use shuttle::endpoint::Endpoint;
use shuttle::manager::ClientManager;
use shuttle::queue::ActionQueue;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

pub fn main() {
    let matches = App::new("DyeWars Server")
        .version("1.0")
        .author("Dye Works Collective")
        .about("Runs the authoritative DyeWars game server.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the config file"))
        .arg(
            Arg::with_name("address")
                .long("address")
                .takes_value(true)
                .help("Listen address override, e.g. 0.0.0.0:8080"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enables debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        logging::Level::Debug
    } else {
        logging::Level::Info
    };
    let logger = logging::term_logger(level);

    let mut config = match matches.value_of("CONFIG_FILE") {
        Some(path) => GameConfig::load(path),
        None => GameConfig::default(),
    };

    if let Some(address) = matches.value_of("address") {
        config.server.address = address.to_string();
    }

    logging::info!(logger, "starting DyeWars server";
                   "address" => %config.server.address,
                   "max_clients" => config.server.max_clients,
                   "map" => format!("{}x{}", config.map.width, config.map.height));

    let manager = Arc::new(ClientManager::new());
    let queue = Arc::new(ActionQueue::new(config.game.action_queue_capacity));
    let io_running = Arc::new(AtomicBool::new(true));

    let router = GameRouter::new(queue.clone(), &logger);
    let (endpoint, wakeup) = Endpoint::new(
        config.endpoint(),
        manager.clone(),
        router,
        io_running.clone(),
        &logger,
    )
    .expect("Failed creating endpoint");

    let io_thread = thread::Builder::new()
        .name("dyewars-io".to_string())
        .spawn(move || endpoint.run())
        .expect("Failed spawning endpoint thread");

    // The real persistence sink (SQL position store) attaches to this
    // receiver; the built-in worker just drains the queue.
    let (persist, persist_rx) = persist_channel(4096);
    let persist_thread = thread::Builder::new()
        .name("dyewars-persist".to_string())
        .spawn(move || while persist_rx.recv().is_ok() {})
        .expect("Failed spawning persistence thread");

    let mut server = GameServer::new(
        config,
        manager,
        queue,
        Some(wakeup),
        io_running,
        persist,
        Box::new(NoopHooks),
        &logger,
    );

    // Runs until ServerControl::stop is invoked (e.g. from a Custom admin
    // action), then broadcasts the shutdown and releases the I/O thread.
    server.run();

    io_thread.join().expect("Endpoint thread panicked");
    drop(server);
    persist_thread.join().expect("Persistence thread panicked");

    logging::info!(logger, "server stopped");
}
