//! Command line interface for the `canbridge` binary.

use clap::Parser;

/// Command line arguments for the `canbridge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "canbridge",
    version,
    about = "Bridge serial CAN29 clients to a networked CAN server"
)]
pub struct Cli {
    /// Serial device the client software is paired with.
    #[arg(short = 'p', long)]
    pub serial_port: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = 57_600)]
    pub baud_rate: u32,

    /// CAN server address, host:port.
    #[arg(short = 's', long)]
    pub server: String,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub request_timeout_ms: u64,

    /// Expiry sweep period in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub sweep_interval_ms: u64,

    /// Network connect timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Network read idle timeout in milliseconds; the connection is
    /// considered dead after this long without a received byte.
    #[arg(long, default_value_t = 30_000)]
    pub read_idle_timeout_ms: u64,

    /// Answer enumeration requests locally, claiming these device ids
    /// (comma separated). Needed when the backend is simulated.
    #[arg(long, value_delimiter = ',')]
    pub enumerate_devices: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_required_arguments() {
        let cli = Cli::parse_from([
            "canbridge",
            "--serial-port",
            "/dev/ttyUSB0",
            "--server",
            "127.0.0.1:2900",
        ]);
        assert_eq!(cli.serial_port, "/dev/ttyUSB0");
        assert_eq!(cli.server, "127.0.0.1:2900");
        assert_eq!(cli.baud_rate, 57_600);
        assert_eq!(cli.read_idle_timeout_ms, 30_000);
    }

    #[test]
    fn parses_device_id_list() {
        let cli = Cli::parse_from([
            "canbridge",
            "-p",
            "COM3",
            "-s",
            "localhost:2900",
            "--enumerate-devices",
            "16,25,40",
        ]);
        assert_eq!(cli.enumerate_devices, Some(vec![16, 25, 40]));
    }
}
