use fleetmaster::allocator::ManualAllocator;
use fleetmaster::authorizer::{Acls, Authorizer, LocalAuthorizer};
use fleetmaster::detector::{MasterUrl, StandaloneContender, StandaloneDetector};
use fleetmaster::registrar::InMemoryRegistrar;
use fleetmaster::{Clock, Master, MasterConfig, MasterExit, Router};
use slog::{info, o, Drain};
use std::str::FromStr;
use std::sync::Arc;

fn usage() -> ! {
    eprintln!(
        "usage: fleetmaster [--master=<host:port|zk://...|file://...>] [--acls=<file>] [--strict]"
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!("component" => "master"));

    let mut config = MasterConfig::default();
    let mut url = MasterUrl::Address(config.address());
    let mut authorizer: Option<Arc<dyn Authorizer>> = None;
    for argument in std::env::args().skip(1) {
        if let Some(value) = argument.strip_prefix("--master=") {
            url = match MasterUrl::from_str(value) {
                Ok(url) => url,
                Err(error) => {
                    eprintln!("{}", error);
                    usage();
                }
            };
        } else if let Some(path) = argument.strip_prefix("--acls=") {
            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(error) => {
                    eprintln!("cannot read acls file '{}': {}", path, error);
                    std::process::exit(2);
                }
            };
            let acls: Acls = match serde_json::from_str(&raw) {
                Ok(acls) => acls,
                Err(error) => {
                    eprintln!("cannot parse acls file '{}': {}", path, error);
                    std::process::exit(2);
                }
            };
            authorizer = Some(Arc::new(LocalAuthorizer::new(acls)));
        } else if argument == "--strict" {
            config.registry_strict = true;
        } else {
            usage();
        }
    }

    if let MasterUrl::Address(address) = &url {
        if let Some((host, port)) = address.split_once(':') {
            config.hostname = host.to_string();
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
    }

    // The coordinator-backed detector and durable registry are
    // deployment concerns; standalone operation elects this master
    // immediately and keeps the registry in memory.
    let clock = Clock::new();
    let router = Router::new();
    let registrar = Arc::new(InMemoryRegistrar::new(config.registry_strict));
    let allocator = Box::new(ManualAllocator::new());
    let contender = Arc::new(StandaloneContender::new());
    let detector = Arc::new(StandaloneDetector::new());

    let master = match Master::new(
        config,
        clock,
        router,
        registrar,
        allocator,
        authorizer,
        contender,
        detector.clone(),
        logger.clone(),
    ) {
        Ok(master) => master,
        Err(error) => {
            eprintln!("misconfiguration: {}", error);
            std::process::exit(2);
        }
    };

    detector.appoint(Some(master.master_info()));

    info!(logger, "Running master"; "address" => master.master_info().address);
    match master.run().await {
        MasterExit::Terminated => {}
        exit => {
            eprintln!("master exited: {:?}", exit);
            std::process::exit(1);
        }
    }
}
