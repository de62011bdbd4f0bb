//! # GPIO adapter.
//!
//! Wraps a raw [`GpioDriver`] for one invocation: calls run on the blocking pool,
//! status sentinels become [`PeripheralError::Io`], and pins are leased through a
//! [`GpioSession`] so two sequences never drive the same pin at once.

use std::sync::Arc;

use crate::error::PeripheralError;
use crate::peripherals::drivers::{GpioDriver, GpioInfo, STATUS_ERROR};
use crate::peripherals::locks::{PeripheralClass, PeripheralGuard, PeripheralId, PeripheralLocks};
use crate::peripherals::scope::InvocationScope;

const CLASS: &str = "gpio";

/// Logic level of a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl Level {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Translates a driver return value into a level.
fn level_from_status(status: i32, op: &'static str, pin: u32) -> Result<Level, PeripheralError> {
    match status {
        0 => Ok(Level::Low),
        s if s > 0 => Ok(Level::High),
        code => Err(PeripheralError::Io {
            class: CLASS,
            op,
            device: format!("pin {pin}"),
            code,
        }),
    }
}

/// Splits the configured pin table into `(read_pin, write_pin)` loopback pairs.
///
/// Entries marked [`STATUS_ERROR`] are skipped; a trailing pin without a partner is ignored.
pub fn loopback_pairs(info: &GpioInfo) -> Vec<(u32, u32)> {
    let pins: Vec<u32> = info
        .pins
        .iter()
        .take(info.pin_count)
        .filter(|p| **p != STATUS_ERROR)
        .filter_map(|p| u32::try_from(*p).ok())
        .collect();
    pins.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

/// GPIO access bound to one invocation.
#[derive(Clone)]
pub struct Gpio {
    driver: Arc<dyn GpioDriver>,
    locks: PeripheralLocks,
    scope: InvocationScope,
}

impl Gpio {
    pub(crate) fn new(driver: Arc<dyn GpioDriver>, locks: PeripheralLocks, scope: InvocationScope) -> Self {
        Self {
            driver,
            locks,
            scope,
        }
    }

    /// Returns the pin configuration.
    pub async fn info(&self) -> Result<GpioInfo, PeripheralError> {
        let driver = Arc::clone(&self.driver);
        self.scope.blocking(move || driver.gpio_info()).await
    }

    /// Leases `pins` exclusively for the lifetime of the returned session.
    pub async fn claim(&self, pins: &[u32]) -> Result<GpioSession, PeripheralError> {
        let ids = pins
            .iter()
            .map(|p| PeripheralId::new(PeripheralClass::Gpio, p.to_string()))
            .collect();
        let guards = self.locks.acquire_all(ids, &self.scope).await?;
        let mut pins = pins.to_vec();
        pins.sort_unstable();
        pins.dedup();
        Ok(GpioSession {
            gpio: self.clone(),
            pins,
            _guards: guards,
        })
    }
}

/// Exclusive lease on a set of pins. Released on drop.
pub struct GpioSession {
    gpio: Gpio,
    pins: Vec<u32>,
    _guards: Vec<PeripheralGuard>,
}

impl GpioSession {
    /// Leased pins, sorted.
    pub fn pins(&self) -> &[u32] {
        &self.pins
    }

    fn ensure_leased(&self, pin: u32) -> Result<(), PeripheralError> {
        if self.pins.binary_search(&pin).is_err() {
            return Err(PeripheralError::NoDevice {
                class: CLASS,
                device: format!("pin {pin} (not leased)"),
            });
        }
        Ok(())
    }

    /// Reads the level of a leased pin.
    pub async fn read(&self, pin: u32) -> Result<Level, PeripheralError> {
        self.ensure_leased(pin)?;
        let driver = Arc::clone(&self.gpio.driver);
        let status = self.gpio.scope.blocking(move || driver.read_gpio(pin)).await?;
        level_from_status(status, "read", pin)
    }

    /// Drives a leased pin and returns the level the driver reports as written.
    pub async fn write(&self, pin: u32, level: Level) -> Result<Level, PeripheralError> {
        self.ensure_leased(pin)?;
        let driver = Arc::clone(&self.gpio.driver);
        let status = self
            .gpio
            .scope
            .blocking(move || driver.write_gpio(pin, level as u8))
            .await?;
        level_from_status(status, "write", pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_becomes_io_error() {
        assert_eq!(level_from_status(1, "read", 3), Ok(Level::High));
        assert_eq!(level_from_status(0, "read", 3), Ok(Level::Low));
        assert_eq!(
            level_from_status(STATUS_ERROR, "write", 3),
            Err(PeripheralError::Io {
                class: "gpio",
                op: "write",
                device: "pin 3".into(),
                code: -1
            })
        );
    }

    #[test]
    fn pairs_skip_unassigned_entries() {
        let info = GpioInfo {
            pin_count: 6,
            pins: vec![-1, 4, 5, -1, 7, 8],
        };
        assert_eq!(loopback_pairs(&info), vec![(4, 5), (7, 8)]);

        let odd = GpioInfo {
            pin_count: 3,
            pins: vec![1, 2, 3],
        };
        assert_eq!(loopback_pairs(&odd), vec![(1, 2)]);
    }

    #[test]
    fn pin_count_bounds_the_table() {
        let info = GpioInfo {
            pin_count: 2,
            pins: vec![1, 2, 3, 4],
        };
        assert_eq!(loopback_pairs(&info), vec![(1, 2)]);
    }
}
