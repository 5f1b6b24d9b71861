//! Bridge configuration.
//!
//! Every timing parameter the core uses — request deadline, sweep period,
//! connect timeout, backoff — is an input collected here; nothing is
//! hardcoded in the forwarding path. The binary populates this from CLI
//! flags; embedders construct it directly.

use thiserror::Error;
use tokio::time::Duration;

use crate::{
    codec::DEFAULT_MAX_BUFFERED, engine::EngineConfig, supervisor::BackoffConfig,
    transport::DEFAULT_BAUD_RATE,
};

/// Configuration errors fatal at startup.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No serial device was specified.
    #[error("serial port must not be empty")]
    EmptySerialPort,

    /// No CAN server address was specified.
    #[error("server address must not be empty")]
    EmptyServerAddr,

    /// The sweep period must undercut the request timeout for timeouts to
    /// be observed promptly.
    #[error("sweep interval {sweep:?} must be shorter than request timeout {timeout:?}")]
    SweepTooSlow {
        /// Configured sweep interval.
        sweep: Duration,
        /// Configured request timeout.
        timeout: Duration,
    },
}

/// Runtime parameters of the bridge.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Serial device the client software is paired with.
    pub serial_port: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Address of the CAN server, `host:port`.
    pub server_addr: String,
    /// Deadline applied to every forwarded request.
    pub request_timeout: Duration,
    /// Period of the expiry sweep.
    pub sweep_interval: Duration,
    /// Timeout for establishing the network transport.
    pub connect_timeout: Duration,
    /// Ceiling on how long the network transport may go without delivering
    /// a byte before it is treated as dead. Catches half-open connections
    /// that keep accepting writes while the server is gone.
    pub read_idle_timeout: Duration,
    /// Buffering limit for the serial decoder.
    pub max_buffered: usize,
    /// Reconnect backoff parameters, shared by both endpoints.
    pub backoff: BackoffConfig,
    /// Device ids to claim in locally answered enumeration requests, for
    /// simulated backends that cannot answer enumeration themselves.
    /// `None` forwards enumeration like any other request.
    pub enumeration_device_ids: Option<Vec<u8>>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            server_addr: String::new(),
            request_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
            read_idle_timeout: Duration::from_secs(30),
            max_buffered: DEFAULT_MAX_BUFFERED,
            backoff: BackoffConfig::default(),
            enumeration_device_ids: None,
        }
    }
}

impl BridgeConfig {
    /// Check the configuration before starting the bridge.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found; these
    /// are the only errors fatal to startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_port.is_empty() {
            return Err(ConfigError::EmptySerialPort);
        }
        if self.server_addr.is_empty() {
            return Err(ConfigError::EmptyServerAddr);
        }
        if self.sweep_interval >= self.request_timeout {
            return Err(ConfigError::SweepTooSlow {
                sweep: self.sweep_interval,
                timeout: self.request_timeout,
            });
        }
        Ok(())
    }

    /// Engine timing parameters derived from this configuration.
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            request_timeout: self.request_timeout,
            sweep_interval: self.sweep_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BridgeConfig {
        BridgeConfig {
            serial_port: "/dev/ttyUSB0".into(),
            server_addr: "127.0.0.1:2900".into(),
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn default_config_with_addresses_is_valid() {
        valid().validate().expect("should validate");
    }

    #[test]
    fn missing_serial_port_is_fatal() {
        let cfg = BridgeConfig {
            serial_port: String::new(),
            ..valid()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptySerialPort));
    }

    #[test]
    fn sweep_interval_must_undercut_timeout() {
        let cfg = BridgeConfig {
            sweep_interval: Duration::from_secs(3),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::SweepTooSlow { .. })
        ));
    }
}
