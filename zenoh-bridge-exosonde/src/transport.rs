//! Instrument transport: single holding register reads and writes.

use std::future::Future;
use std::time::Duration;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::info;

use crate::config::{SerialConfig, SondeConfig};

/// Failure of a single transport operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial open failed on '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("Register {address}: no response within {timeout:?}")]
    Timeout { address: u16, timeout: Duration },
    #[error("Register {address}: {source}")]
    Modbus {
        address: u16,
        #[source]
        source: tokio_modbus::Error,
    },
    #[error("Register {address}: exception {code:?}")]
    Exception {
        address: u16,
        code: tokio_modbus::ExceptionCode,
    },
    #[error("Register {address}: empty response")]
    EmptyResponse { address: u16 },
}

/// An open connection to the instrument.
///
/// Every call completes its round trip before returning; callers never
/// have more than one request in flight.
pub trait InstrumentTransport: Send {
    /// Read one holding register.
    fn read_register(
        &mut self,
        address: u16,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;

    /// Write one holding register.
    fn write_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Something that can open an [`InstrumentTransport`].
pub trait Connect {
    type Transport: InstrumentTransport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Opens Modbus RTU connections over a serial line.
#[derive(Debug, Clone)]
pub struct RtuConnector {
    serial: SerialConfig,
    unit_id: u8,
    timeout: Duration,
}

impl RtuConnector {
    pub fn new(serial: SerialConfig, unit_id: u8, timeout: Duration) -> Self {
        Self {
            serial,
            unit_id,
            timeout,
        }
    }

    pub fn from_config(config: &SondeConfig) -> Self {
        Self::new(
            config.serial.clone(),
            config.unit_id,
            config.request_timeout(),
        )
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        let serial = &self.serial;

        let parity = match serial.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        tokio_serial::new(&serial.port, serial.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
    }
}

impl Connect for RtuConnector {
    type Transport = RtuTransport;

    async fn connect(&self) -> Result<RtuTransport, TransportError> {
        let stream = tokio_serial::SerialStream::open(&self.builder()).map_err(|source| {
            TransportError::Open {
                port: self.serial.port.clone(),
                source,
            }
        })?;

        info!(
            port = %self.serial.port,
            baud_rate = self.serial.baud_rate,
            unit_id = self.unit_id,
            "Serial port opened"
        );

        Ok(RtuTransport {
            ctx: rtu::attach_slave(stream, Slave(self.unit_id)),
            timeout: self.timeout,
        })
    }
}

/// Modbus RTU client bound to one unit id.
pub struct RtuTransport {
    ctx: Context,
    timeout: Duration,
}

impl InstrumentTransport for RtuTransport {
    async fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        let timeout = self.timeout;
        let words = tokio::time::timeout(timeout, self.ctx.read_holding_registers(address, 1))
            .await
            .map_err(|_| TransportError::Timeout { address, timeout })?
            .map_err(|source| TransportError::Modbus { address, source })?
            .map_err(|code| TransportError::Exception { address, code })?;

        words
            .first()
            .copied()
            .ok_or(TransportError::EmptyResponse { address })
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.ctx.write_single_register(address, value))
            .await
            .map_err(|_| TransportError::Timeout { address, timeout })?
            .map_err(|source| TransportError::Modbus { address, source })?
            .map_err(|code| TransportError::Exception { address, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_from_config() {
        let config = SondeConfig {
            unit_id: 3,
            timeout_ms: 250,
            ..SondeConfig::default()
        };

        let connector = RtuConnector::from_config(&config);
        assert_eq!(connector.unit_id, 3);
        assert_eq!(connector.timeout, Duration::from_millis(250));
        assert_eq!(connector.serial.port, "/dev/waggle-sensor-exosonde3");
    }

    #[tokio::test]
    async fn test_missing_port_is_open_error() {
        let serial = SerialConfig {
            port: "/dev/sondesight-no-such-port".to_string(),
            ..SerialConfig::default()
        };
        let connector = RtuConnector::new(serial, 1, Duration::from_millis(100));

        match connector.connect().await {
            Err(TransportError::Open { port, .. }) => {
                assert_eq!(port, "/dev/sondesight-no-such-port")
            }
            Err(other) => panic!("expected open error, got {other}"),
            Ok(_) => panic!("port should not exist"),
        }
    }

    #[test]
    fn test_error_messages_name_the_register() {
        let err = TransportError::Timeout {
            address: 447,
            timeout: Duration::from_millis(1000),
        };
        assert_eq!(err.to_string(), "Register 447: no response within 1s");

        let err = TransportError::EmptyResponse { address: 3 };
        assert_eq!(err.to_string(), "Register 3: empty response");
    }
}
