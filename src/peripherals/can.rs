//! # CAN bus adapter.
//!
//! [`CanFrame`] validates frames (at most 8 data bytes, 29-bit identifier) and
//! parses the textual form used by ground operators:
//!
//! ```text
//! "0x123 0x11,0x12,0x13"  ──►  CanFrame { arbitration_id: 0x123, data: [0x11, 0x12, 0x13] }
//! ```
//!
//! Opening a channel takes the per-channel lock, starts the driver receiver and
//! returns a [`CanSession`]. Reception waits are bounded polls that check
//! cancellation on every tick instead of sleeping blindly.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::PeripheralError;
use crate::peripherals::drivers::{CanDriver, CanInfo};
use crate::peripherals::locks::{PeripheralClass, PeripheralGuard, PeripheralId, PeripheralLocks};
use crate::peripherals::scope::InvocationScope;

const CLASS: &str = "can";

/// Largest extended (29-bit) arbitration identifier.
pub const MAX_ARBITRATION_ID: u32 = 0x1FFF_FFFF;

/// Maximum classic CAN payload.
pub const MAX_DATA_LEN: usize = 8;

/// Upper bound on frames taken by one [`CanSession::drain`].
const DRAIN_LIMIT: usize = 4096;

/// A validated CAN frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    arbitration_id: u32,
    data: Vec<u8>,
}

impl CanFrame {
    pub fn new(arbitration_id: u32, data: Vec<u8>) -> Result<Self, PeripheralError> {
        if arbitration_id > MAX_ARBITRATION_ID {
            return Err(invalid(format!("arbitration id {arbitration_id:#x} exceeds 29 bits")));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(invalid(format!("{} data bytes (max {MAX_DATA_LEN})", data.len())));
        }
        Ok(Self {
            arbitration_id,
            data,
        })
    }

    pub fn arbitration_id(&self) -> u32 {
        self.arbitration_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Same payload with the identifier advanced by `n` (wrapping inside 29 bits).
    #[must_use]
    pub fn with_id_offset(&self, n: u32) -> Self {
        Self {
            arbitration_id: self.arbitration_id.wrapping_add(n) & MAX_ARBITRATION_ID,
            data: self.data.clone(),
        }
    }
}

impl Default for CanFrame {
    /// `0x123 0x11,0x12,0x13,0x14,0x15,0x16,0x17`
    fn default() -> Self {
        Self {
            arbitration_id: 0x123,
            data: vec![0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17],
        }
    }
}

fn invalid(reason: String) -> PeripheralError {
    PeripheralError::InvalidFrame { reason }
}

fn parse_hex(s: &str) -> Result<u32, PeripheralError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| invalid(format!("{s:?}: {e}")))
}

impl FromStr for CanFrame {
    type Err = PeripheralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [id, bytes] = parts.as_slice() else {
            return Err(invalid(format!(
                "expected \"<arbitration id> <byte>,<byte>,...\", got {} fields",
                parts.len()
            )));
        };
        let arbitration_id = parse_hex(id)?;
        let data = bytes
            .split(',')
            .map(|b| {
                let v = parse_hex(b.trim())?;
                u8::try_from(v).map_err(|_| invalid(format!("byte {b:?} exceeds 0xff")))
            })
            .collect::<Result<Vec<u8>, _>>()?;
        CanFrame::new(arbitration_id, data)
    }
}

/// CAN access bound to one invocation.
#[derive(Clone)]
pub struct Can {
    driver: Arc<dyn CanDriver>,
    locks: PeripheralLocks,
    scope: InvocationScope,
    poll_interval: Duration,
}

impl Can {
    pub(crate) fn new(
        driver: Arc<dyn CanDriver>,
        locks: PeripheralLocks,
        scope: InvocationScope,
        poll_interval: Duration,
    ) -> Self {
        Self {
            driver,
            locks,
            scope,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Returns the channel configuration.
    pub async fn info(&self) -> Result<CanInfo, PeripheralError> {
        let driver = Arc::clone(&self.driver);
        self.scope.blocking(move || driver.can_info()).await
    }

    /// Opens the first configured channel.
    pub async fn open_first(&self) -> Result<CanSession, PeripheralError> {
        let info = self.info().await?;
        let channel = info
            .can_dev
            .into_iter()
            .next()
            .ok_or_else(|| PeripheralError::NoDevice {
                class: CLASS,
                device: "0".into(),
            })?;
        self.open(&channel).await
    }

    /// Takes `channel` exclusively and starts its receiver.
    pub async fn open(&self, channel: &str) -> Result<CanSession, PeripheralError> {
        let guard = self
            .locks
            .acquire(PeripheralId::new(PeripheralClass::Can, channel), &self.scope)
            .await?;

        let driver = Arc::clone(&self.driver);
        let ch = channel.to_string();
        let status = self.scope.blocking(move || driver.start_receiver(&ch)).await?;
        if status < 0 {
            return Err(PeripheralError::Io {
                class: CLASS,
                op: "start_receiver",
                device: channel.to_string(),
                code: status,
            });
        }

        tracing::debug!(channel, "can receiver started");
        Ok(CanSession {
            can: self.clone(),
            channel: channel.to_string(),
            _guard: guard,
        })
    }
}

/// An exclusively held CAN channel with a running receiver.
pub struct CanSession {
    can: Can,
    channel: String,
    _guard: PeripheralGuard,
}

impl CanSession {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn io(&self, op: &'static str, code: i32) -> PeripheralError {
        PeripheralError::Io {
            class: CLASS,
            op,
            device: self.channel.clone(),
            code,
        }
    }

    /// Sends one frame.
    pub async fn send(&self, frame: &CanFrame) -> Result<(), PeripheralError> {
        let driver = Arc::clone(&self.can.driver);
        let (ch, id, data) = (self.channel.clone(), frame.arbitration_id, frame.data.clone());
        let status = self
            .can
            .scope
            .blocking(move || driver.send(&ch, id, &data))
            .await?;
        if status < 0 {
            return Err(self.io("send", status));
        }
        Ok(())
    }

    /// Number of frames waiting in the receive buffer.
    pub async fn pending(&self) -> Result<usize, PeripheralError> {
        let driver = Arc::clone(&self.can.driver);
        let count = self.can.scope.blocking(move || driver.received_count()).await?;
        usize::try_from(count).map_err(|_| self.io("received_count", count))
    }

    /// Pops one received frame payload.
    pub async fn read(&self) -> Result<Vec<u8>, PeripheralError> {
        let driver = Arc::clone(&self.can.driver);
        self.can
            .scope
            .blocking(move || driver.read_data())
            .await?
            .map_err(|code| self.io("read", code))
    }

    /// Waits until at least `min` frames are pending or `within` elapses.
    ///
    /// Returns the pending count observed last. Fails with `Cancelled` as soon as
    /// the invocation is cancelled.
    pub async fn wait_for(&self, min: usize, within: Duration) -> Result<usize, PeripheralError> {
        let deadline = Instant::now() + within;
        let mut tick = time::interval(self.can.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.can.scope.token().cancelled() => return Err(PeripheralError::Cancelled),
                _ = tick.tick() => {}
            }
            let pending = self.pending().await?;
            if pending >= min || Instant::now() >= deadline {
                return Ok(pending);
            }
        }
    }

    /// Reads every pending frame (bounded).
    pub async fn drain(&self) -> Result<Vec<Vec<u8>>, PeripheralError> {
        let mut frames = Vec::new();
        while frames.len() < DRAIN_LIMIT && self.pending().await? > 0 {
            frames.push(self.read().await?);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_syntax() {
        let f: CanFrame = "0x123 0x11,0x12,0x13".parse().unwrap();
        assert_eq!(f.arbitration_id(), 0x123);
        assert_eq!(f.data(), &[0x11, 0x12, 0x13]);

        let g: CanFrame = "7ff ff".parse().unwrap();
        assert_eq!(g.arbitration_id(), 0x7ff);
        assert_eq!(g.data(), &[0xff]);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!("0x123".parse::<CanFrame>().is_err());
        assert!("0x123 0x11 extra".parse::<CanFrame>().is_err());
        assert!("0xZZ 0x11".parse::<CanFrame>().is_err());
        assert!("0x123 0x100".parse::<CanFrame>().is_err());
        assert!("0x123 1,2,3,4,5,6,7,8,9".parse::<CanFrame>().is_err());
        assert!(CanFrame::new(MAX_ARBITRATION_ID + 1, vec![]).is_err());
    }

    #[test]
    fn id_offset_wraps_within_29_bits() {
        let f = CanFrame::new(MAX_ARBITRATION_ID, vec![1]).unwrap();
        assert_eq!(f.with_id_offset(1).arbitration_id(), 0);
        assert_eq!(CanFrame::default().with_id_offset(2).arbitration_id(), 0x125);
    }
}
