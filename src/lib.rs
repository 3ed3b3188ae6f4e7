#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` driver for the ABOV A96T3X6 capacitive grip/proximity
//! sensor.
//!
//! The A96T3X6 is a single-channel capacitive controller used for grip and
//! body-proximity detection (SAR compliance). This crate exposes a strongly
//! typed API on top of the register protocol, with helpers for:
//!
//! - Decoding grip press/release interrupts and forwarding them to the host
//! - Enabling/disabling sensing, sar-only mode and the charger noise policy
//! - Reading diff, raw, baseline, threshold and total-capacitance diagnostics
//! - Running the periodic diagnostic poller that keeps the sensor healthy
//! - Flashing firmware images in boot mode, with checksum and version
//!   verification and bounded retry
//! - Using `embedded-hal` / `embedded-hal-async` 1.0 traits so the driver
//!   works across MCU families
//!
//! ```no_run
//! use embedded_hal_async::{delay::DelayNs, i2c::{I2c, SevenBitAddress}};
//! use embassy_sync::blocking_mutex::raw::NoopRawMutex;
//! use a96t3x6::{A96t3x6, Config, Platform};
//!
//! async fn example<I2C, D, P, E>(i2c: I2C, delay: D, platform: P)
//! where
//!   I2C: I2c<SevenBitAddress, Error = E>,
//!   D: DelayNs + Clone,
//!   P: Platform,
//! {
//!   let sensor: A96t3x6<NoopRawMutex, _, _, _> =
//!     A96t3x6::new(i2c, delay, platform, Config::default());
//!   _ = sensor.set_enable(true).await;
//! }
//! ```

mod bus;
mod control;
mod diag;
mod event;
mod fw;
mod platform;
mod poll;
mod reg;
#[cfg(test)]
mod testing;

use core::cell::RefCell;

use embassy_sync::blocking_mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use bus::Bus;
pub use fw::FirmwareImage;
pub use platform::{FirmwareProvider, FirmwareSource, GripEvent, Platform, PowerControl, UpdateStatus};
use poll::PollControl;

/// Errors that can occur while interacting with the sensor.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// I²C transaction failed with the underlying driver error, after the
  /// bounded retry envelope was exhausted.
  Transport(E),
  /// A raw boot-mode frame did not go out in full; the transfer must abort.
  ShortWrite,
  /// The device answered a boot-mode command with an unexpected code.
  UnexpectedResponse(u8),
  /// Flash checksum read back from the device differs from the image's.
  ChecksumMismatch { device: u16, image: u16 },
  /// Firmware revision read back after flashing differs from the image's.
  VersionMismatch { device: u8, image: u8 },
  /// The firmware provider had no image for the requested source.
  ImageUnavailable,
  /// The firmware image is malformed (truncated header or ragged length).
  InvalidImage,
}

/// Static device configuration, consumed at construction.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  /// Code the device answers with after a successful boot-mode entry.
  pub boot_ack: u8,
  /// Whether this unit routes audio jack state into the noise policy.
  pub earjack_noise: bool,
  /// Bring-up units skip the firmware version gate in [`A96t3x6::check_firmware`].
  pub bringup: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self { boot_ack: 0x39, earjack_noise: false, bringup: false }
  }
}

/// Live driver state, readable by the host between operations.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct State {
  pub enabled: bool,
  pub sar_mode: bool,
  pub skip_event: bool,
  pub earjack: bool,
  pub resume_called: bool,
  pub pressed: bool,
  pub diff: u16,
  pub diff_ref: u16,
  pub raw: u16,
  pub raw_ref: u16,
  pub baseline: u16,
  pub total_cap: u16,
  pub press_threshold: u16,
  pub release_threshold: u16,
  pub noise_threshold: u16,
  pub fw_ver: u8,
  pub md_ver: u8,
  pub checksum: (u8, u8),
  pub irq_en_count: u32,
  pub update_status: UpdateStatus,
  pub(crate) charger_attached: Option<bool>,
  pub(crate) debug_count: u32,
  pub(crate) prev_closed: bool,
  #[cfg(feature = "factory-diag")]
  pub abnormal_mode: bool,
  #[cfg(feature = "factory-diag")]
  pub max_diff: u16,
  #[cfg(feature = "factory-diag")]
  pub max_normal_diff: u16,
  #[cfg(feature = "factory-diag")]
  pub irq_count: u32,
}

/// Driver for the ABOV A96T3X6 grip sensor.
///
/// The driver owns the I²C peripheral and a delay source and calls out to the
/// host through the [`Platform`] capability trait. Methods take `&self`;
/// internal locking lets the interrupt handler, the diagnostic poller and the
/// firmware engine share one instance across tasks.
pub struct A96t3x6<M: RawMutex, I, D, P> {
  bus: Bus<M, I, D>,
  timer: Mutex<M, D>,
  platform: Mutex<M, P>,
  config: Config,
  state: blocking_mutex::Mutex<M, RefCell<State>>,
  poll: PollControl<M>,
}

impl<M, I, D, P, E> A96t3x6<M, I, D, P>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  D: DelayNs + Clone,
  P: Platform,
{
  /// Create a new driver instance.
  ///
  /// Nothing is transmitted to the device until the first operation; the host
  /// typically calls [`A96t3x6::check_firmware`] and then
  /// [`A96t3x6::set_enable`] during bring-up.
  pub fn new(i2c: I, delay: D, platform: P, config: Config) -> Self {
    Self {
      bus: Bus::new(i2c, delay.clone()),
      timer: Mutex::new(delay),
      platform: Mutex::new(platform),
      config,
      state: blocking_mutex::Mutex::new(RefCell::new(State::default())),
      poll: PollControl::new(),
    }
  }

  /// Snapshot of the live driver state.
  pub fn state(&self) -> State {
    self.with_state(|s| *s)
  }

  pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
    self.state.lock(|cell| f(&mut cell.borrow_mut()))
  }

  pub(crate) async fn sleep_ms(&self, ms: u32) {
    self.timer.lock().await.delay_ms(ms).await;
  }
}
