use std::path::PathBuf;
use std::process::ExitCode;

use ensemble::{Config, Node, NodeError};
use log::{error, info};

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run() -> Result<(), NodeError> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ensemble.toml"));

    let config = Config::load(&config_path)?;
    info!("starting node {} as {:?} role", config.node_id, config.role);

    let node = Node::start(&config)?;
    info!("node {} ({}) is up", config.node_id, node.role_name());

    // The engines drive themselves from background threads; the process just needs to stay
    // alive to keep those threads and the transport listener running.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
