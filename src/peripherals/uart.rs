//! # UART adapter.
//!
//! Opening a port takes the per-port lock and returns a [`UartSession`]. The
//! session closes the port and releases the lock when dropped, on every exit
//! path of the handler (return, `?`, panic, abandonment after a timeout).
//!
//! A read or write that is still blocked when the invocation is cancelled (or
//! times out) is interrupted through the port's [`PortInterrupt`], so the port
//! can always be closed and the device handed to the next invocation.
//!
//! ## Release ordering
//! ```text
//! drop(session)
//!   ├─► interrupter.interrupt()    ◄── unblocks a read stuck on a silent line
//!   └─► spawn_blocking {
//!          wait for the in-progress read/write to return (port mutex)
//!          port.close()
//!          release device lock      ◄── next opener proceeds only now
//!       }
//! ```

use std::sync::{Arc, Mutex};

use crate::error::PeripheralError;
use crate::peripherals::drivers::{PortInterrupt, SerialPort, UartDriver, UartInfo};
use crate::peripherals::locks::{PeripheralClass, PeripheralGuard, PeripheralId, PeripheralLocks};
use crate::peripherals::scope::InvocationScope;

const CLASS: &str = "uart";

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// UART access bound to one invocation.
#[derive(Clone)]
pub struct Uart {
    driver: Arc<dyn UartDriver>,
    locks: PeripheralLocks,
    scope: InvocationScope,
    baud: u32,
}

impl Uart {
    pub(crate) fn new(
        driver: Arc<dyn UartDriver>,
        locks: PeripheralLocks,
        scope: InvocationScope,
        baud: u32,
    ) -> Self {
        Self {
            driver,
            locks,
            scope,
            baud,
        }
    }

    /// Returns the port configuration.
    pub async fn info(&self) -> Result<UartInfo, PeripheralError> {
        let driver = Arc::clone(&self.driver);
        self.scope.blocking(move || driver.uart_info()).await
    }

    /// Baud rate used by [`open`](Self::open).
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Opens the first configured port.
    pub async fn open_first(&self) -> Result<UartSession, PeripheralError> {
        let info = self.info().await?;
        let port = info
            .uart_dev
            .into_iter()
            .next()
            .ok_or_else(|| PeripheralError::NoDevice {
                class: CLASS,
                device: "0".into(),
            })?;
        self.open(&port).await
    }

    /// Opens `port` exclusively, waiting while another invocation holds it.
    pub async fn open(&self, port: &str) -> Result<UartSession, PeripheralError> {
        let guard = self
            .locks
            .acquire(PeripheralId::new(PeripheralClass::Uart, port), &self.scope)
            .await?;

        let driver = Arc::clone(&self.driver);
        let (name, baud) = (port.to_string(), self.baud);
        let opened = self
            .scope
            .blocking(move || driver.open(&name, baud))
            .await?
            .map_err(|e| PeripheralError::Open {
                device: port.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(port, baud = self.baud, "uart opened");
        Ok(UartSession {
            interrupter: opened.interrupter(),
            port: Arc::new(Mutex::new(Some(opened))),
            name: port.to_string(),
            scope: self.scope.clone(),
            guard: Some(guard),
        })
    }
}

/// An open, exclusively held serial port.
pub struct UartSession {
    port: SharedPort,
    interrupter: Arc<dyn PortInterrupt>,
    name: String,
    scope: InvocationScope,
    guard: Option<PeripheralGuard>,
}

impl UartSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn io_error(&self, op: &'static str, e: std::io::Error) -> PeripheralError {
        PeripheralError::Io {
            class: CLASS,
            op,
            device: self.name.clone(),
            code: e.raw_os_error().unwrap_or(-1),
        }
    }

    fn closed(&self) -> PeripheralError {
        PeripheralError::NoDevice {
            class: CLASS,
            device: format!("{} (closed)", self.name),
        }
    }

    /// Runs a port call on the blocking pool; on cancellation the call is interrupted.
    async fn on_port<T, F>(&self, f: F) -> Result<T, PeripheralError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let res = self.scope.blocking(f).await;
        if matches!(res, Err(PeripheralError::Cancelled)) {
            self.interrupter.interrupt();
        }
        res
    }

    /// Writes `data`; returns the number of bytes written.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PeripheralError> {
        let port = Arc::clone(&self.port);
        let data = data.to_vec();
        let res = self
            .on_port(move || {
                let mut port = port.lock().unwrap_or_else(|p| p.into_inner());
                port.as_mut().map(|p| p.write(&data))
            })
            .await?;
        match res {
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(self.io_error("write", e)),
            None => Err(self.closed()),
        }
    }

    /// Reads up to and including the next newline.
    pub async fn read_line(&self) -> Result<Vec<u8>, PeripheralError> {
        let port = Arc::clone(&self.port);
        let res = self
            .on_port(move || {
                let mut port = port.lock().unwrap_or_else(|p| p.into_inner());
                port.as_mut().map(|p| p.read_line())
            })
            .await?;
        match res {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(self.io_error("read", e)),
            None => Err(self.closed()),
        }
    }

    /// Closes the port now. Equivalent to dropping the session.
    pub fn close(self) {}
}

impl Drop for UartSession {
    fn drop(&mut self) {
        self.interrupter.interrupt();
        let port = Arc::clone(&self.port);
        let guard = self.guard.take();
        let name = std::mem::take(&mut self.name);
        let release = move || {
            let mut slot = port.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(mut p) = slot.take() {
                p.close();
            }
            drop(slot);
            drop(guard);
            tracing::debug!(port = %name, "uart closed");
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }
}
