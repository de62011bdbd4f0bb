//! # Hardware and client collaborator interfaces.
//!
//! These traits are implemented by the hardware abstraction layer of a given
//! payload computer. Driver traits are **synchronous and blocking** and keep the
//! vendor convention of status sentinels ([`STATUS_ERROR`] = `-1`); the typed
//! adapters in this module translate them into [`PeripheralError`](crate::PeripheralError)
//! and run them on the blocking pool.
//!
//! The client trait is asynchronous: its calls are RPCs to the payload controller.

use std::sync::Arc;

use async_trait::async_trait;

/// Driver status sentinel for a failed call.
pub const STATUS_ERROR: i32 = -1;

/// Spacecraft position reported by the payload controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Payload power request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    Off = 0,
    On = 1,
}

impl TryFrom<u8> for PowerState {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PowerState::Off),
            1 => Ok(PowerState::On),
            other => Err(other),
        }
    }
}

/// Response to a payload controller request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientResponse {
    /// Controller status code (`0` = accepted).
    pub code: i32,
}

impl ClientResponse {
    pub const OK: ClientResponse = ClientResponse { code: 0 };

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Errors reported by the client transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("client call {call} failed: {reason}")]
pub struct ClientError {
    /// Call name.
    pub call: &'static str,
    /// Transport-reported reason.
    pub reason: String,
}

/// Payload controller client (location, power, file staging).
#[async_trait]
pub trait PayloadClient: Send + Sync + 'static {
    async fn get_current_location(&self) -> Result<Location, ClientError>;

    async fn payload_power_control(&self, state: PowerState) -> Result<ClientResponse, ClientError>;

    /// Stages a file already present in the outbound directory for downlink.
    async fn stage_file_download(&self, filename: &str) -> Result<ClientResponse, ClientError>;
}

/// GPIO configuration as reported by the payload controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpioInfo {
    pub pin_count: usize,
    /// Pin numbers; `-1` marks an unassigned entry.
    pub pins: Vec<i32>,
}

/// Raw GPIO driver.
pub trait GpioDriver: Send + Sync + 'static {
    fn gpio_info(&self) -> GpioInfo;

    /// Returns the pin level, or [`STATUS_ERROR`].
    fn read_gpio(&self, pin: u32) -> i32;

    /// Drives the pin and returns the written level, or [`STATUS_ERROR`].
    fn write_gpio(&self, pin: u32, value: u8) -> i32;
}

/// UART configuration as reported by the payload controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UartInfo {
    pub uart_port_count: usize,
    pub uart_dev: Vec<String>,
}

/// Aborts blocking calls on an open port from another thread.
pub trait PortInterrupt: Send + Sync + 'static {
    /// Makes the blocked call, and every later one on the same port, return
    /// promptly with an error. Idempotent.
    fn interrupt(&self);
}

/// An open serial port. Blocking.
pub trait SerialPort: Send + 'static {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Reads up to and including the next `\n`.
    fn read_line(&mut self) -> std::io::Result<Vec<u8>>;

    fn close(&mut self);

    /// Handle that unblocks `read_line`/`write` while another thread is inside them.
    fn interrupter(&self) -> Arc<dyn PortInterrupt>;
}

/// Raw UART driver.
pub trait UartDriver: Send + Sync + 'static {
    fn uart_info(&self) -> UartInfo;

    fn open(&self, port: &str, baud: u32) -> std::io::Result<Box<dyn SerialPort>>;
}

/// CAN configuration as reported by the payload controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanInfo {
    pub can_port_count: usize,
    pub can_dev: Vec<String>,
}

/// Raw CAN driver.
pub trait CanDriver: Send + Sync + 'static {
    fn can_info(&self) -> CanInfo;

    /// Starts the driver-side receiver for `channel`; returns `0` or [`STATUS_ERROR`].
    fn start_receiver(&self, channel: &str) -> i32;

    /// Sends one frame; returns `0` or [`STATUS_ERROR`].
    fn send(&self, channel: &str, arbitration_id: u32, data: &[u8]) -> i32;

    /// Number of frames waiting in the receive buffer, or [`STATUS_ERROR`].
    fn received_count(&self) -> i32;

    /// Pops one received frame payload, or returns the error status.
    fn read_data(&self) -> Result<Vec<u8>, i32>;
}
