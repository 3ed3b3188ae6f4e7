//! Shared I²C channel with bounded retry.
//!
//! Every logical transaction (a register read, a register write, a raw boot
//! frame) holds the bus lock for its whole retry envelope, so concurrent tasks
//! never interleave halves of each other's transactions.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::warn;

use crate::reg::{self, Reg};
use crate::Error;

/// Run an async fallible operation up to `$attempts` times, evaluating the
/// `$backoff` expression (usually a sleep) between attempts. Yields the last
/// result.
macro_rules! retry {
  ($attempts:expr, $backoff:expr, $op:expr) => {{
    let mut result = $op;
    let mut attempt = 1u8;
    while result.is_err() && attempt < $attempts {
      $backoff;
      result = $op;
      attempt += 1;
    }
    result
  }};
}

pub(crate) use retry;

struct BusParts<I, D> {
  i2c: I,
  delay: D,
}

pub(crate) struct Bus<M: RawMutex, I, D> {
  inner: Mutex<M, BusParts<I, D>>,
}

impl<M, I, D, E> Bus<M, I, D>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  D: DelayNs,
{
  pub(crate) fn new(i2c: I, delay: D) -> Self {
    Self { inner: Mutex::new(BusParts { i2c, delay }) }
  }

  /// Register read: one-byte address phase, then `buf.len()` data bytes. The
  /// whole transaction is retried, never a single phase.
  pub(crate) async fn read(&self, reg: Reg, buf: &mut [u8]) -> Result<(), Error<E>> {
    self.read_addr(reg.into(), buf).await
  }

  pub(crate) async fn read_addr(&self, addr: u8, buf: &mut [u8]) -> Result<(), Error<E>> {
    let parts = &mut *self.inner.lock().await;
    let result = retry!(
      reg::BUS_RETRY_ATTEMPTS,
      parts.delay.delay_ms(reg::BUS_RETRY_BACKOFF_MS).await,
      parts.i2c.write_read(reg::I2C_ADDR, &[addr], buf).await
    );
    if result.is_err() {
      warn!("a96t3x6: register 0x{:02x} read failed after retries", addr);
    }
    result.map_err(Error::Transport)
  }

  pub(crate) async fn read_u8(&self, reg: Reg) -> Result<u8, Error<E>> {
    let mut buf = [0u8; 1];
    self.read(reg, &mut buf).await?;
    Ok(buf[0])
  }

  pub(crate) async fn read_u16(&self, reg: Reg) -> Result<u16, Error<E>> {
    let mut buf = [0u8; 2];
    self.read(reg, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
  }

  pub(crate) async fn write(&self, reg: Reg, value: u8) -> Result<(), Error<E>> {
    self.write_addr(reg.into(), value).await
  }

  pub(crate) async fn write_addr(&self, addr: u8, value: u8) -> Result<(), Error<E>> {
    let parts = &mut *self.inner.lock().await;
    let result = retry!(
      reg::BUS_RETRY_ATTEMPTS,
      parts.delay.delay_ms(reg::BUS_RETRY_BACKOFF_MS).await,
      parts.i2c.write(reg::I2C_ADDR, &[addr, value]).await
    );
    if result.is_err() {
      warn!("a96t3x6: register 0x{:02x} write failed after retries", addr);
    }
    result.map_err(Error::Transport)
  }

  /// Raw frame send for boot-mode commands, single attempt. A failure here
  /// means the page or command frame may have been partially clocked out, so
  /// the caller must abort rather than retry blindly.
  pub(crate) async fn raw_send(&self, frame: &[u8]) -> Result<(), Error<E>> {
    let parts = &mut *self.inner.lock().await;
    parts.i2c.write(reg::I2C_ADDR, frame).await.map_err(|_| Error::ShortWrite)
  }

  /// Raw address-less read for boot-mode replies, retried like register reads.
  pub(crate) async fn raw_recv(&self, buf: &mut [u8]) -> Result<(), Error<E>> {
    let parts = &mut *self.inner.lock().await;
    let result = retry!(
      reg::BUS_RETRY_ATTEMPTS,
      parts.delay.delay_ms(reg::BUS_RETRY_BACKOFF_MS).await,
      parts.i2c.read(reg::I2C_ADDR, buf).await
    );
    result.map_err(Error::Transport)
  }
}
