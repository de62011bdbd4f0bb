//! Peripheral access: collaborator traits, typed adapters, per-device exclusion.
//!
//! ## Layers
//! ```text
//! handler ──► ExecutionContext ──► ClientHandle / Gpio / Uart / Can   (typed, scoped, cancellable)
//!                                        │
//!                                        ├─► PeripheralLocks            (one holder per device)
//!                                        └─► drivers::*Driver           (raw, blocking, -1 sentinels)
//! ```
//!
//! [`Hardware`] is the application-wide bundle of installed drivers and locks;
//! the engine derives a scoped view of it for every invocation.

mod can;
mod client;
pub mod drivers;
mod gpio;
mod locks;
mod scope;
mod uart;

use std::sync::Arc;
use std::time::Duration;

pub use can::{Can, CanFrame, CanSession, MAX_ARBITRATION_ID, MAX_DATA_LEN};
pub use client::ClientHandle;
pub use gpio::{loopback_pairs, Gpio, GpioSession, Level};
pub use locks::{PeripheralClass, PeripheralGuard, PeripheralId, PeripheralLocks};
pub use scope::InvocationScope;
pub use uart::{Uart, UartSession};

use crate::config::AppConfig;
use crate::error::PeripheralError;
use drivers::{CanDriver, GpioDriver, PayloadClient, UartDriver};

/// Installed drivers plus the shared device locks.
///
/// ## Example
/// ```rust
/// use payloadvisor::peripherals::Hardware;
/// use payloadvisor::sim::{LoopbackGpio, SimClient};
///
/// let hw = Hardware::new()
///     .with_client(SimClient::arc())
///     .with_gpio(LoopbackGpio::arc(&[4, 5]));
/// ```
#[derive(Clone)]
pub struct Hardware {
    client: Option<Arc<dyn PayloadClient>>,
    gpio: Option<Arc<dyn GpioDriver>>,
    uart: Option<Arc<dyn UartDriver>>,
    can: Option<Arc<dyn CanDriver>>,
    locks: PeripheralLocks,
    uart_baud: u32,
    can_poll_interval: Duration,
}

impl Default for Hardware {
    fn default() -> Self {
        let cfg = AppConfig::default();
        Self {
            client: None,
            gpio: None,
            uart: None,
            can: None,
            locks: PeripheralLocks::new(),
            uart_baud: cfg.uart_baud,
            can_poll_interval: cfg.can_poll_interval,
        }
    }
}

impl Hardware {
    /// No drivers installed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<dyn PayloadClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_gpio(mut self, driver: Arc<dyn GpioDriver>) -> Self {
        self.gpio = Some(driver);
        self
    }

    pub fn with_uart(mut self, driver: Arc<dyn UartDriver>) -> Self {
        self.uart = Some(driver);
        self
    }

    pub fn with_can(mut self, driver: Arc<dyn CanDriver>) -> Self {
        self.can = Some(driver);
        self
    }

    /// Device locks shared by every invocation.
    pub fn locks(&self) -> &PeripheralLocks {
        &self.locks
    }

    /// Applies UART/CAN settings from the application config.
    pub(crate) fn configure(&mut self, cfg: &AppConfig) {
        self.uart_baud = cfg.uart_baud;
        self.can_poll_interval = cfg.can_poll_interval;
    }

    pub(crate) fn client_for(&self, scope: &InvocationScope) -> ClientHandle {
        ClientHandle::new(self.client.clone(), scope.clone())
    }

    pub(crate) fn gpio_for(&self, scope: &InvocationScope) -> Result<Gpio, PeripheralError> {
        let driver = self
            .gpio
            .clone()
            .ok_or(PeripheralError::Unavailable { class: "gpio" })?;
        Ok(Gpio::new(driver, self.locks.clone(), scope.clone()))
    }

    pub(crate) fn uart_for(&self, scope: &InvocationScope) -> Result<Uart, PeripheralError> {
        let driver = self
            .uart
            .clone()
            .ok_or(PeripheralError::Unavailable { class: "uart" })?;
        Ok(Uart::new(driver, self.locks.clone(), scope.clone(), self.uart_baud))
    }

    pub(crate) fn can_for(&self, scope: &InvocationScope) -> Result<Can, PeripheralError> {
        let driver = self
            .can
            .clone()
            .ok_or(PeripheralError::Unavailable { class: "can" })?;
        Ok(Can::new(
            driver,
            self.locks.clone(),
            scope.clone(),
            self.can_poll_interval,
        ))
    }
}
