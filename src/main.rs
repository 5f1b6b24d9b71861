//! The `canbridge` binary: wires CLI flags into a running bridge.

mod cli;

use std::{process::ExitCode, sync::Arc};

use canbridge::{
    BridgeConfig, ConnectionSupervisor, EventSink,
    transport::{SerialConnector, TcpConnector},
};
use clap::Parser;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = BridgeConfig {
        serial_port: cli.serial_port,
        baud_rate: cli.baud_rate,
        server_addr: cli.server,
        request_timeout: Duration::from_millis(cli.request_timeout_ms),
        sweep_interval: Duration::from_millis(cli.sweep_interval_ms),
        connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
        read_idle_timeout: Duration::from_millis(cli.read_idle_timeout_ms),
        enumeration_device_ids: cli.enumerate_devices,
        ..BridgeConfig::default()
    };
    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    let serial = Arc::new(SerialConnector::new(&config.serial_port, config.baud_rate));
    let network = Arc::new(TcpConnector::new(
        &config.server_addr,
        config.connect_timeout,
    ));
    ConnectionSupervisor::new(serial, network, config, EventSink::disabled())
        .run()
        .await;
    ExitCode::SUCCESS
}
