use std::path::PathBuf;

use clap::{crate_authors, App, Arg};
use meshlock::config::DaemonConfig;
use meshlock::daemon::Daemon;
use meshlock::logger;

fn default_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".meshlock").join("config.toml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = App::new("meshlockd")
        .about("Semantic lock and context sync daemon for coordinating autonomous coding agents")
        .author(crate_authors!())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .about("Path to the daemon's TOML config file")
                .takes_value(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .about("Suppress info-level logging"),
        )
        .get_matches();

    let config_path = matches.value_of("config").map(PathBuf::from).unwrap_or_else(default_config_path);
    let config = DaemonConfig::load(&config_path)?;

    let level = if matches.is_present("quiet") {
        logger::Level::Warning
    } else {
        logger::Level::Info
    };
    let _logger_guard = logger::init(level, None);

    log::info!("starting meshlockd (node {}, data dir {})", config.node_id, config.data_dir.display());

    let daemon = Daemon::new(config).await?;
    daemon.serve().await?;
    log::info!("meshlockd ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received interrupt, shutting down");
        }
        _ = daemon.cancellation().cancelled() => {
            log::info!("shutdown requested over rpc");
        }
    }

    daemon.shutdown().await;
    Ok(())
}
