//! Process entrypoint: parses CLI arguments, loads configuration and the
//! geosite database, binds the listeners, and runs until a shutdown
//! signal arrives.

use clap::Parser;
use rustdns_forwarder::client::pool::UdpSocketPool;
use rustdns_forwarder::config::Config;
use rustdns_forwarder::forwarder::ForwarderService;
use rustdns_forwarder::geosite::GeositeStore;
use rustdns_forwarder::listeners;
use rustdns_forwarder::rules::RuleEngine;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const UDP_POOL_SIZE: usize = 2500;

#[derive(Parser)]
#[command(version, about = "A policy-routed DNS forwarder")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "appsettings.json")]
    config: PathBuf,

    /// Path to the v2ray-format geosite database.
    #[arg(long, default_value = "geosite.dat")]
    geosite: PathBuf,

    /// Address the plain UDP listener binds to.
    #[arg(long, default_value = "0.0.0.0:5383")]
    udp_listen: SocketAddr,

    /// Address the DoH HTTP listener binds to.
    #[arg(long, default_value = "0.0.0.0:8125")]
    doh_listen: SocketAddr,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let geosite = match GeositeStore::load(&cli.geosite) {
        Ok(g) => g,
        Err(e) => {
            log::error!("failed to load geosite database: {}", e);
            process::exit(1);
        }
    };

    let rules = RuleEngine::new(config.rules.clone(), geosite);

    let pool = match UdpSocketPool::new(UDP_POOL_SIZE, &HashSet::new()).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            log::error!("failed to initialize UDP socket pool: {}", e);
            process::exit(1);
        }
    };

    let service = Arc::new(ForwarderService::new(Arc::new(config), rules, pool));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let udp_task = tokio::spawn(listeners::udp::serve(
        cli.udp_listen,
        service.clone(),
        shutdown_tx.subscribe(),
    ));
    let doh_task = tokio::spawn(listeners::doh::serve(
        cli.doh_listen,
        service.clone(),
        shutdown_tx.subscribe(),
    ));

    if tokio::signal::ctrl_c().await.is_err() {
        log::error!("failed to install Ctrl-C handler");
        process::exit(1);
    }

    log::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let (udp_result, doh_result) = tokio::join!(udp_task, doh_task);

    if let Err(e) = udp_result.expect("UDP listener task panicked") {
        log::error!("UDP listener exited with an error: {}", e);
        process::exit(1);
    }
    if let Err(e) = doh_result.expect("DoH listener task panicked") {
        log::error!("DoH listener exited with an error: {}", e);
        process::exit(1);
    }
}
