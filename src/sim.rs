//! # Simulated hardware.
//!
//! In-memory implementations of the driver and client traits, wired the way the
//! payload bring-up bench is wired:
//! - [`LoopbackGpio`]: pins are connected back-to-back in pairs `(read, write)`.
//! - [`LoopbackUart`]: TX is looped to RX; optional per-read delay emulates a slow line,
//!   a silent line never delivers a newline until the read is interrupted.
//! - [`LoopbackCan`]: every sent frame lands in the receive buffer.
//! - [`SimClient`]: fixed location, records power and staging requests.
//!
//! Faults can be injected to exercise the sentinel translation paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::peripherals::drivers::{
    CanDriver, CanInfo, ClientError, ClientResponse, GpioDriver, GpioInfo, Location, PayloadClient,
    PortInterrupt, PowerState, SerialPort, UartDriver, UartInfo, STATUS_ERROR,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------
// Client
// ---------------------------

/// In-memory payload controller client.
#[derive(Default)]
pub struct SimClient {
    power: Mutex<Vec<PowerState>>,
    staged: Mutex<Vec<String>>,
}

impl SimClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Power requests received so far.
    pub fn power_requests(&self) -> Vec<PowerState> {
        lock(&self.power).clone()
    }

    /// Files staged so far.
    pub fn staged_files(&self) -> Vec<String> {
        lock(&self.staged).clone()
    }
}

#[async_trait]
impl PayloadClient for SimClient {
    async fn get_current_location(&self) -> Result<Location, ClientError> {
        Ok(Location {
            latitude: 12.97,
            longitude: 77.59,
            altitude: 550.0,
        })
    }

    async fn payload_power_control(&self, state: PowerState) -> Result<ClientResponse, ClientError> {
        lock(&self.power).push(state);
        Ok(ClientResponse::OK)
    }

    async fn stage_file_download(&self, filename: &str) -> Result<ClientResponse, ClientError> {
        if filename.is_empty() {
            return Err(ClientError {
                call: "stage_file_download",
                reason: "empty file name".into(),
            });
        }
        lock(&self.staged).push(filename.to_string());
        Ok(ClientResponse::OK)
    }
}

// ---------------------------
// GPIO
// ---------------------------

/// Back-to-back wired GPIO pins.
pub struct LoopbackGpio {
    pins: Vec<i32>,
    partner: HashMap<u32, u32>,
    levels: Mutex<HashMap<u32, u8>>,
    failing: Mutex<HashSet<u32>>,
}

impl LoopbackGpio {
    /// `pins` are wired pairwise: `pins[0]↔pins[1]`, `pins[2]↔pins[3]`, ...
    pub fn new(pins: &[u32]) -> Self {
        let mut partner = HashMap::new();
        for pair in pins.chunks_exact(2) {
            partner.insert(pair[0], pair[1]);
            partner.insert(pair[1], pair[0]);
        }
        Self {
            pins: pins.iter().map(|p| *p as i32).collect(),
            partner,
            levels: Mutex::new(pins.iter().map(|p| (*p, 0)).collect()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn arc(pins: &[u32]) -> Arc<Self> {
        Arc::new(Self::new(pins))
    }

    /// Makes every access to `pin` report [`STATUS_ERROR`].
    pub fn fail_pin(&self, pin: u32) {
        lock(&self.failing).insert(pin);
    }

    pub fn level(&self, pin: u32) -> Option<u8> {
        lock(&self.levels).get(&pin).copied()
    }
}

impl GpioDriver for LoopbackGpio {
    fn gpio_info(&self) -> GpioInfo {
        GpioInfo {
            pin_count: self.pins.len(),
            pins: self.pins.clone(),
        }
    }

    fn read_gpio(&self, pin: u32) -> i32 {
        if lock(&self.failing).contains(&pin) {
            return STATUS_ERROR;
        }
        lock(&self.levels)
            .get(&pin)
            .map(|v| i32::from(*v))
            .unwrap_or(STATUS_ERROR)
    }

    fn write_gpio(&self, pin: u32, value: u8) -> i32 {
        if lock(&self.failing).contains(&pin) {
            return STATUS_ERROR;
        }
        let mut levels = lock(&self.levels);
        if !levels.contains_key(&pin) {
            return STATUS_ERROR;
        }
        let value = u8::from(value != 0);
        levels.insert(pin, value);
        if let Some(other) = self.partner.get(&pin) {
            levels.insert(*other, value);
        }
        i32::from(value)
    }
}

// ---------------------------
// UART
// ---------------------------

/// Loopback UART ports.
pub struct LoopbackUart {
    ports: Vec<String>,
    read_delay: Duration,
    silent: bool,
    open_now: Arc<AtomicUsize>,
    open_max: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl LoopbackUart {
    pub fn new(ports: &[&str]) -> Self {
        Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            read_delay: Duration::ZERO,
            silent: false,
            open_now: Arc::new(AtomicUsize::new(0)),
            open_max: Arc::new(AtomicUsize::new(0)),
            opened_total: AtomicUsize::new(0),
        }
    }

    /// Each `read_line` blocks the calling thread for `delay`.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// `read_line` blocks until the port is interrupted (TX/RX wire cut).
    pub fn with_silent_line(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Largest number of simultaneously open ports observed.
    pub fn max_concurrent_open(&self) -> usize {
        self.open_max.load(Ordering::SeqCst)
    }

    /// Ports currently open.
    pub fn open_count(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// Total successful opens.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl UartDriver for LoopbackUart {
    fn uart_info(&self) -> UartInfo {
        UartInfo {
            uart_port_count: self.ports.len(),
            uart_dev: self.ports.clone(),
        }
    }

    fn open(&self, port: &str, _baud: u32) -> std::io::Result<Box<dyn SerialPort>> {
        if !self.ports.iter().any(|p| p == port) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such port {port}"),
            ));
        }
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.open_max.fetch_max(now, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackPort {
            buf: VecDeque::new(),
            read_delay: self.read_delay,
            silent: self.silent,
            wake: Arc::default(),
            open_now: Arc::clone(&self.open_now),
            closed: false,
        }))
    }
}

/// Interrupt flag shared between a port and its interrupter.
#[derive(Default)]
struct Wake {
    interrupted: Mutex<bool>,
    cond: Condvar,
}

impl Wake {
    /// Blocks for up to `d` (forever when `None`); fails if interrupted.
    fn wait(&self, d: Option<Duration>) -> std::io::Result<()> {
        let flag = lock(&self.interrupted);
        let flag = match d {
            Some(d) => {
                self.cond
                    .wait_timeout_while(flag, d, |i| !*i)
                    .unwrap_or_else(|p| p.into_inner())
                    .0
            }
            None => self
                .cond
                .wait_while(flag, |i| !*i)
                .unwrap_or_else(|p| p.into_inner()),
        };
        if *flag {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    fn is_set(&self) -> bool {
        *lock(&self.interrupted)
    }
}

impl PortInterrupt for Wake {
    fn interrupt(&self) {
        *lock(&self.interrupted) = true;
        self.cond.notify_all();
    }
}

fn interrupted() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Interrupted, "port interrupted")
}

struct LoopbackPort {
    buf: VecDeque<u8>,
    read_delay: Duration,
    silent: bool,
    wake: Arc<Wake>,
    open_now: Arc<AtomicUsize>,
    closed: bool,
}

impl SerialPort for LoopbackPort {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.wake.is_set() {
            return Err(interrupted());
        }
        self.buf.extend(data);
        Ok(data.len())
    }

    fn read_line(&mut self) -> std::io::Result<Vec<u8>> {
        if self.silent {
            self.wake.wait(None)?;
        } else if !self.read_delay.is_zero() {
            self.wake.wait(Some(self.read_delay))?;
        } else if self.wake.is_set() {
            return Err(interrupted());
        }
        let end = self
            .buf
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(self.buf.len());
        Ok(self.buf.drain(..end).collect())
    }

    fn interrupter(&self) -> Arc<dyn PortInterrupt> {
        Arc::clone(&self.wake) as Arc<dyn PortInterrupt>
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------
// CAN
// ---------------------------

/// Loopback CAN bus: sent frames are received on the same bus.
pub struct LoopbackCan {
    channels: Vec<String>,
    started: Mutex<HashSet<String>>,
    rx: Mutex<VecDeque<Vec<u8>>>,
    sent: AtomicUsize,
    fail_reads: Mutex<bool>,
}

impl LoopbackCan {
    pub fn new(channels: &[&str]) -> Self {
        Self {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            started: Mutex::new(HashSet::new()),
            rx: Mutex::new(VecDeque::new()),
            sent: AtomicUsize::new(0),
            fail_reads: Mutex::new(false),
        }
    }

    pub fn arc(channels: &[&str]) -> Arc<Self> {
        Arc::new(Self::new(channels))
    }

    /// Frames sent so far.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Makes `read_data` report [`STATUS_ERROR`].
    pub fn fail_reads(&self) {
        *lock(&self.fail_reads) = true;
    }
}

impl CanDriver for LoopbackCan {
    fn can_info(&self) -> CanInfo {
        CanInfo {
            can_port_count: self.channels.len(),
            can_dev: self.channels.clone(),
        }
    }

    fn start_receiver(&self, channel: &str) -> i32 {
        if !self.channels.iter().any(|c| c == channel) {
            return STATUS_ERROR;
        }
        lock(&self.started).insert(channel.to_string());
        0
    }

    fn send(&self, channel: &str, arbitration_id: u32, data: &[u8]) -> i32 {
        if !lock(&self.started).contains(channel) {
            return STATUS_ERROR;
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        let mut frame = arbitration_id.to_be_bytes().to_vec();
        frame.extend_from_slice(data);
        lock(&self.rx).push_back(frame);
        0
    }

    fn received_count(&self) -> i32 {
        i32::try_from(lock(&self.rx).len()).unwrap_or(i32::MAX)
    }

    fn read_data(&self) -> Result<Vec<u8>, i32> {
        if *lock(&self.fail_reads) {
            return Err(STATUS_ERROR);
        }
        lock(&self.rx).pop_front().ok_or(STATUS_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_unblocks_a_silent_read() {
        let uart = LoopbackUart::new(&["/dev/ttyS1"]).with_silent_line();
        let mut port = uart.open("/dev/ttyS1", 9600).unwrap();
        let interrupter = port.interrupter();

        let reader = std::thread::spawn(move || {
            let res = port.read_line();
            (res.map_err(|e| e.kind()), port)
        });
        std::thread::sleep(Duration::from_millis(50));
        interrupter.interrupt();

        let (res, mut port) = reader.join().unwrap();
        assert_eq!(res, Err(std::io::ErrorKind::Interrupted));
        assert!(port.write(b"late\n").is_err());
        port.close();
        assert_eq!(uart.open_count(), 0);
    }
}
