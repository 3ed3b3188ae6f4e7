use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{info, warn};

use crate::bus::retry;
use crate::platform::{GripEvent, Platform};
use crate::reg::{self, Reg};
use crate::{A96t3x6, Error};

impl<M, I, D, P, E> A96t3x6<M, I, D, P>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  D: DelayNs + Clone,
  P: Platform,
  E: core::fmt::Debug,
{
  /// Enable or disable grip sensing.
  ///
  /// Enabling writes the enable command, reports the current grip state from
  /// a threshold/diff comparison, then unmasks the interrupt line and makes it
  /// wake-capable. Disabling masks the interrupt line first so the device can
  /// never fire mid-command, then writes the disable command. Transitions to
  /// the current state are no-ops.
  pub async fn set_enable(&self, on: bool) -> Result<(), Error<E>> {
    if self.with_state(|s| s.enabled) == on {
      return Ok(());
    }
    if on {
      self.enable_sequence().await
    } else {
      self.with_state(|s| s.enabled = false);
      {
        let mut platform = self.platform.lock().await;
        platform.irq_set_wake(false);
        platform.irq_disable();
      }
      self.bus.write(Reg::SarEnable, reg::CMD_OFF).await
    }
  }

  /// The `Disabled → Enabled` transition, without the idempotence check, so
  /// reset recovery can replay it unconditionally.
  pub(crate) async fn enable_sequence(&self) -> Result<(), Error<E>> {
    self.with_state(|s| s.enabled = true);
    if let Err(e) = self.bus.write(Reg::SarEnable, reg::CMD_ON).await {
      // The device may still be settling from a reset; report the current
      // state anyway and let the interrupt path catch up.
      warn!("a96t3x6: enable command failed: {:?}", e);
    }
    self.check_first_status().await;
    let mut platform = self.platform.lock().await;
    platform.irq_enable();
    platform.irq_set_wake(true);
    drop(platform);
    self.with_state(|s| s.irq_en_count += 1);
    Ok(())
  }

  /// Report the grip state the device is already in at enable time, so the
  /// host never misses a press that predates the first interrupt.
  pub(crate) async fn check_first_status(&self) {
    self.read_thresholds().await;
    self.read_diff().await;
    let (diff, press_threshold, skip) =
      self.with_state(|s| (s.diff, s.press_threshold, s.skip_event));
    if skip {
      info!("a96t3x6: skip initial grip report");
      return;
    }
    let event = if press_threshold < diff { GripEvent::Press } else { GripEvent::Release };
    self.with_state(|s| s.pressed = event == GripEvent::Press);
    self.platform.lock().await.report(event);
  }

  /// Switch sar-only (approach-detection-only) mode.
  ///
  /// After writing, the mode register is read back and its value is trusted
  /// over the requested one. If the readback fails the previous value is
  /// retained.
  pub async fn set_sar_only_mode(&self, on: bool) -> Result<(), Error<E>> {
    if self.with_state(|s| s.sar_mode) == on {
      return Ok(());
    }
    let cmd = if on { reg::CMD_ON } else { reg::CMD_OFF };
    self.bus.write(Reg::SarMode, cmd).await?;
    self.sleep_ms(reg::MODE_SETTLE_MS).await;
    match self.bus.read_u8(Reg::SarMode).await {
      Ok(readback) => {
        let actual = readback == reg::CMD_ON;
        info!("a96t3x6: sar-only mode now {}", actual);
        self.with_state(|s| s.sar_mode = actual);
      }
      Err(e) => warn!("a96t3x6: sar-only readback failed, keeping previous: {:?}", e),
    }
    Ok(())
  }

  /// Switch the sensing block on or off without touching the enable state.
  pub async fn set_sar_sensing(&self, on: bool) -> Result<(), Error<E>> {
    let cmd = if on { reg::CMD_ON } else { reg::CMD_OFF };
    self.bus.write(Reg::SarSensing, cmd).await
  }

  /// Put the device in always-active mode (or back to normal).
  ///
  /// The ready code is polled a few times; if it never appears the mode is
  /// treated as best-effort and the mismatch is only logged.
  pub(crate) async fn always_active(&self, on: bool) {
    let cmd = if on { reg::CMD_ON } else { reg::CMD_OFF };
    // Entering the mode reads back the ready code; leaving it reads back the
    // off command itself.
    let expected = if on { reg::ALWAYS_ACTIVE_READY } else { reg::CMD_OFF };
    if let Err(e) = self.bus.write(Reg::GripAlwaysActive, cmd).await {
      warn!("a96t3x6: always-active write failed: {:?}", e);
      return;
    }
    let result = retry!(
      reg::ALWAYS_ACTIVE_ATTEMPTS,
      self.sleep_ms(reg::ALWAYS_ACTIVE_POLL_MS).await,
      match self.bus.read_u8(Reg::GripAlwaysActive).await {
        Ok(code) if code == expected => Ok(()),
        Ok(code) => Err(Error::<E>::UnexpectedResponse(code)),
        Err(e) => Err(e),
      }
    );
    if let Err(e) = result {
      warn!("a96t3x6: always-active ready code not seen: {:?}", e);
    }
  }

  /// Software reset: probe diff and total capacitance three times, then issue
  /// the reset command and wait for it to settle.
  pub async fn grip_sw_reset(&self) -> Result<(), Error<E>> {
    for _ in 0..3 {
      self.check_diff_and_cap().await;
      self.sleep_ms(reg::TOTAL_CAP_SETTLE_MS).await;
    }
    self.bus.write(Reg::SwReset, reg::CMD_SW_RESET).await?;
    self.sleep_ms(reg::SW_RESET_SETTLE_MS).await;
    Ok(())
  }

  /// Full defensive reset: mask the interrupt, power-cycle, wait for the
  /// device to come up, and replay the enable transition if sensing was on.
  pub async fn reset(&self) -> Result<(), Error<E>> {
    let was_enabled = self.with_state(|s| s.enabled);
    info!("a96t3x6: full reset (enabled={})", was_enabled);
    self.platform.lock().await.irq_disable();
    self.power_cycle().await;
    self.sleep_ms(reg::RESET_DELAY_MS).await;
    if was_enabled {
      self.enable_sequence().await?;
    }
    Ok(())
  }

  pub(crate) async fn power_cycle(&self) {
    let mut platform = self.platform.lock().await;
    platform.power_off().await;
    drop(platform);
    self.sleep_ms(reg::POWER_OFF_MS).await;
    self.platform.lock().await.power_on().await;
  }

  /// Audio-jack policy. Units without the noise-suppression requirement only
  /// toggle sar-only mode; units with it trade the whole sensing path for
  /// silence while the jack is inserted.
  pub async fn set_earjack(&self, inserted: bool) -> Result<(), Error<E>> {
    self.with_state(|s| s.earjack = inserted);
    if !self.config.earjack_noise {
      return self.set_sar_only_mode(inserted).await;
    }
    if inserted {
      self.set_enable(false).await?;
      self.set_sar_sensing(false).await
    } else {
      self.grip_sw_reset().await?;
      self.set_sar_sensing(true).await?;
      self.set_enable(true).await
    }
  }

  /// Charger/USB presence toggles the noise-suppression register. Repeated
  /// notifications for the same state are dropped.
  pub async fn set_charger_attached(&self, attached: bool) -> Result<(), Error<E>> {
    if self.with_state(|s| s.charger_attached) == Some(attached) {
      return Ok(());
    }
    self.with_state(|s| s.charger_attached = Some(attached));
    let cmd = if attached { reg::CMD_OFF } else { reg::CMD_ON };
    self.bus.write(Reg::Tspta, cmd).await
  }

  /// Suppress (or resume) forwarding of decoded grip events. Diagnostics keep
  /// refreshing either way.
  pub fn set_event_suppression(&self, suppress: bool) {
    self.with_state(|s| s.skip_event = suppress);
  }

  /// Store a new press threshold, high byte first.
  pub async fn set_press_threshold(&self, threshold: u16) -> Result<(), Error<E>> {
    let [hi, lo] = threshold.to_be_bytes();
    self.bus.write_addr(Reg::SarThreshold as u8, hi).await?;
    self.bus.write_addr(Reg::SarThreshold as u8 + 1, lo).await?;
    self.with_state(|s| s.press_threshold = threshold);
    Ok(())
  }

  /// Store a new release threshold, high byte first.
  pub async fn set_release_threshold(&self, threshold: u16) -> Result<(), Error<E>> {
    let [hi, lo] = threshold.to_be_bytes();
    self.bus.write_addr(Reg::SarThreshold as u8 + 2, hi).await?;
    self.bus.write_addr(Reg::SarThreshold as u8 + 3, lo).await?;
    self.with_state(|s| s.release_threshold = threshold);
    Ok(())
  }

  /// Host suspend: drop to sar-only mode and stop the poller. The interrupt
  /// line stays armed and wake-capable so grips still wake the system.
  pub async fn suspend(&self) {
    self.with_state(|s| s.resume_called = false);
    if let Err(e) = self.set_sar_only_mode(true).await {
      warn!("a96t3x6: suspend mode switch failed: {:?}", e);
    }
    self.stop_poller().await;
  }

  /// Host resume: restart the poller with a short first tick that restores
  /// normal mode before diagnostics continue.
  pub fn resume(&self) {
    self.with_state(|s| s.resume_called = true);
    self.start_poller();
  }
}
