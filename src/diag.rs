//! Diagnostic register reads. Persistent failures zero the stored reading so
//! queries never return stale-but-mislabeled data.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, warn};

use crate::bus::retry;
use crate::platform::Platform;
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
  /// Refresh the main and reference channel capacitance deltas.
  pub async fn read_diff(&self) -> (u16, u16) {
    let mut buf = [0u8; 4];
    match self.bus.read(Reg::SarDiffData, &mut buf).await {
      Ok(()) => {
        let diff = u16::from_be_bytes([buf[0], buf[1]]);
        let diff_ref = u16::from_be_bytes([buf[2], buf[3]]);
        self.with_state(|s| {
          s.diff = diff;
          s.diff_ref = diff_ref;
        });
        (diff, diff_ref)
      }
      Err(_) => {
        self.with_state(|s| {
          s.diff = 0;
          s.diff_ref = 0;
        });
        (0, 0)
      }
    }
  }

  /// Refresh the main and reference channel raw capacitance counts.
  pub async fn read_raw(&self) -> (u16, u16) {
    let mut buf = [0u8; 4];
    match self.bus.read(Reg::SarRawData, &mut buf).await {
      Ok(()) => {
        let raw = u16::from_be_bytes([buf[0], buf[1]]);
        let raw_ref = u16::from_be_bytes([buf[2], buf[3]]);
        self.with_state(|s| {
          s.raw = raw;
          s.raw_ref = raw_ref;
        });
        (raw, raw_ref)
      }
      Err(_) => {
        self.with_state(|s| {
          s.raw = 0;
          s.raw_ref = 0;
        });
        (0, 0)
      }
    }
  }

  /// Refresh press, release and noise thresholds.
  pub async fn read_thresholds(&self) -> (u16, u16, u16) {
    let mut buf = [0u8; 4];
    let (press, release) = match self.bus.read(Reg::SarThreshold, &mut buf).await {
      Ok(()) => (u16::from_be_bytes([buf[0], buf[1]]), u16::from_be_bytes([buf[2], buf[3]])),
      Err(_) => (0, 0),
    };
    let noise = self.bus.read_u16(Reg::SarNoiseThreshold).await.unwrap_or(0);
    self.with_state(|s| {
      s.press_threshold = press;
      s.release_threshold = release;
      s.noise_threshold = noise;
    });
    (press, release, noise)
  }

  /// Refresh the capacitance baseline.
  pub async fn read_baseline(&self) -> u16 {
    let baseline = self.bus.read_u16(Reg::SarBaseline).await.unwrap_or(0);
    self.with_state(|s| s.baseline = baseline);
    baseline
  }

  /// Trigger and read a total-capacitance measurement.
  pub async fn read_total_cap(&self) -> u16 {
    if let Err(e) = self.bus.write(Reg::SarTotalCap, reg::TOTAL_CAP_TRIGGER).await {
      warn!("a96t3x6: total-cap trigger failed: {:?}", e);
      self.with_state(|s| s.total_cap = 0);
      return 0;
    }
    self.sleep_ms(reg::TOTAL_CAP_SETTLE_MS).await;
    let cap = self.bus.read_u16(Reg::SarTotalCapRead).await.unwrap_or(0);
    self.with_state(|s| s.total_cap = cap);
    cap
  }

  pub(crate) async fn check_diff_and_cap(&self) {
    let (diff, _) = self.read_diff().await;
    let cap = self.read_total_cap().await;
    debug!("a96t3x6: diff {} total-cap {}", diff, cap);
  }

  /// Read firmware and model revisions.
  ///
  /// Outside boot mode the device only answers reliably in always-active
  /// mode, so the read is bracketed by mode switches; a failed read gets one
  /// more chance after a full reset.
  pub async fn read_firmware_version(&self, in_boot: bool) -> Result<(u8, u8), Error<E>> {
    if !in_boot {
      self.always_active(true).await;
    }
    let mut result = self.version_regs().await;
    if result.is_err() && !in_boot {
      warn!("a96t3x6: version read failed, retrying after reset");
      self.reset().await?;
      self.always_active(true).await;
      result = self.version_regs().await;
    }
    if !in_boot {
      self.always_active(false).await;
    }
    let (fw, md) = result?;
    self.with_state(|s| {
      s.fw_ver = fw;
      s.md_ver = md;
    });
    Ok((fw, md))
  }

  async fn version_regs(&self) -> Result<(u8, u8), Error<E>> {
    let fw = self.bus.read_u8(Reg::FwVer).await?;
    let md = self.bus.read_u8(Reg::ModelNo).await?;
    Ok((fw, md))
  }

  /// Wait for the software-reset ready code after a reset, then refresh diff
  /// and total capacitance.
  pub async fn wait_sw_reset_ready(&self) -> Result<(), Error<E>> {
    self.sleep_ms(reg::SW_RESET_READY_FIRST_MS).await;
    let result = retry!(
      reg::SW_RESET_READY_ATTEMPTS,
      self.sleep_ms(reg::SW_RESET_READY_POLL_MS).await,
      match self.bus.read_u8(Reg::SwReset).await {
        Ok(code) if code == reg::SW_RESET_READY => Ok(()),
        Ok(code) => Err(Error::<E>::UnexpectedResponse(code)),
        Err(e) => Err(e),
      }
    );
    result?;
    self.check_diff_and_cap().await;
    Ok(())
  }

  /// Enter or leave factory abnormal-mode tracking. While active, the event
  /// path counts interrupts and keeps a high-water mark of press diffs.
  #[cfg(feature = "factory-diag")]
  pub async fn set_abnormal_mode(&self, on: bool) {
    self.with_state(|s| {
      s.abnormal_mode = on;
      if on {
        s.irq_count = 0;
        s.max_diff = 0;
      }
    });
    if on {
      let (diff, _) = self.read_diff().await;
      self.with_state(|s| {
        s.max_normal_diff = diff;
      });
    }
  }
}
