//! Firmware flashing over the I²C bus.
//!
//! One update is a session through an explicit state machine:
//! `LoadImage → EnterBootMode → Erase → WriteBlocks → ReadChecksum →
//! ExitBootMode → PowerCycle → VerifyVersion`. Checksum or version trouble
//! rewinds the session to `EnterBootMode` until the outer retry budget runs
//! out. The interrupt line is masked for the whole session and restored on
//! every exit path.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{info, warn};

use crate::bus::retry;
use crate::platform::{FirmwareProvider, FirmwareSource, Platform, UpdateStatus};
use crate::reg::{self, Reg};
use crate::{A96t3x6, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum UpdateState {
  EnterBootMode,
  Erase,
  WriteBlocks,
  ReadChecksum,
  ExitBootMode,
  PowerCycle,
  VerifyVersion,
}

/// A parsed firmware image. Borrows the provider's bytes; nothing is retained
/// once the update attempt returns.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareImage<'a> {
  source: FirmwareSource,
  bytes: &'a [u8],
  /// (model revision, firmware revision) declared by the header.
  version: (u8, u8),
  checksum: u16,
}

impl<'a> FirmwareImage<'a> {
  /// Parse an image. The first 32-byte page is a header: byte 1 is the model
  /// revision, byte 5 the firmware revision, bytes 8–9 the big-endian flash
  /// checksum. The header page is never written to the device.
  pub fn parse<E>(source: FirmwareSource, bytes: &'a [u8]) -> Result<Self, Error<E>> {
    if bytes.len() < 2 * reg::PAGE_SIZE || bytes.len() % reg::PAGE_SIZE != 0 {
      return Err(Error::InvalidImage);
    }
    Ok(Self {
      source,
      bytes,
      version: (bytes[1], bytes[5]),
      checksum: u16::from_be_bytes([bytes[8], bytes[9]]),
    })
  }

  pub fn model_revision(&self) -> u8 {
    self.version.0
  }

  pub fn firmware_revision(&self) -> u8 {
    self.version.1
  }

  pub fn checksum(&self) -> u16 {
    self.checksum
  }

  fn pages(&self) -> impl Iterator<Item = &'a [u8]> {
    self.bytes.chunks_exact(reg::PAGE_SIZE).skip(1)
  }
}

impl<M, I, D, P, E> A96t3x6<M, I, D, P>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  D: DelayNs + Clone,
  P: Platform,
  E: core::fmt::Debug,
{
  /// Flash the device if the bundled image is ahead of it.
  ///
  /// Flashes when the model revision differs, the device firmware is older
  /// than the image, or the device runs a test build. Returns whether a flash
  /// happened. Bring-up units skip the check entirely.
  pub async fn check_firmware<F: FirmwareProvider>(&self, provider: &mut F) -> Result<bool, Error<E>> {
    if self.config.bringup {
      info!("a96t3x6: bring-up unit, firmware check skipped");
      return Ok(false);
    }
    let (image_model, image_fw) = {
      let bytes = provider.load(FirmwareSource::Builtin).await.ok_or(Error::ImageUnavailable)?;
      let image = FirmwareImage::parse(FirmwareSource::Builtin, bytes)?;
      (image.model_revision(), image.firmware_revision())
    };
    let (device_fw, device_model) = self.read_firmware_version(false).await?;

    let needs_update = device_fw > reg::TEST_FIRMWARE_DETECT_VER
      || device_model != image_model
      || device_fw < image_fw;
    info!(
      "a96t3x6: device fw 0x{:02x} md 0x{:02x}, image fw 0x{:02x} md 0x{:02x}, update={}",
      device_fw, device_model, image_fw, image_model, needs_update
    );
    if !needs_update {
      return Ok(false);
    }
    self.update_firmware(provider, FirmwareSource::Builtin).await?;
    Ok(true)
  }

  /// Run one firmware update session.
  ///
  /// The image is loaded before any device state is touched; if the provider
  /// has nothing, the session fails without ever masking the interrupt line.
  pub async fn update_firmware<F: FirmwareProvider>(
    &self,
    provider: &mut F,
    source: FirmwareSource,
  ) -> Result<(), Error<E>> {
    self.publish_status(UpdateStatus::Downloading).await;

    let Some(bytes) = provider.load(source).await else {
      warn!("a96t3x6: no firmware image for {:?}", source);
      self.publish_status(UpdateStatus::Fail).await;
      return Err(Error::ImageUnavailable);
    };
    let image = match FirmwareImage::parse(source, bytes) {
      Ok(image) => image,
      Err(e) => {
        self.publish_status(UpdateStatus::Fail).await;
        return Err(e);
      }
    };

    self.platform.lock().await.irq_disable();
    let result = self.flash(&image).await;
    let restore = self.restore_after_flash().await;
    self.platform.lock().await.irq_enable();

    let outcome = result.and(restore);
    let status = if outcome.is_ok() { UpdateStatus::Pass } else { UpdateStatus::Fail };
    self.publish_status(status).await;
    outcome
  }

  /// Drive a session to a terminal state.
  ///
  /// Version reads inside the session use the boot-mode flavor: the reset
  /// retry inside [`A96t3x6::read_firmware_version`] replays the enable
  /// transition, which would unmask the interrupt line mid-session.
  async fn flash(&self, image: &FirmwareImage<'_>) -> Result<(), Error<E>> {
    // The pre-flash version is only informational; the device may be
    // unresponsive, which is exactly why we are flashing.
    if let Ok((fw, md)) = self.read_firmware_version(true).await {
      info!("a96t3x6: flashing over fw 0x{:02x} md 0x{:02x}", fw, md);
    }

    let mut state = UpdateState::EnterBootMode;
    let mut retries_remaining = reg::OUTER_RETRY_ATTEMPTS;
    let mut block_index: usize = 0;
    let mut address = reg::USER_CODE_ADDRESS;
    let mut device_checksum = 0u16;

    loop {
      match state {
        UpdateState::EnterBootMode => {
          self.enter_boot_mode().await?;
          state = UpdateState::Erase;
        }

        UpdateState::Erase => {
          // Fire and forget; the settle delay is the only acknowledgment.
          self.bus.raw_send(&reg::CMD_FLASH_ERASE).await?;
          self.sleep_ms(reg::FLASH_ERASE_SETTLE_MS).await;
          block_index = 0;
          address = reg::USER_CODE_ADDRESS;
          state = UpdateState::WriteBlocks;
        }

        UpdateState::WriteBlocks => match image.pages().nth(block_index) {
          Some(page) => {
            self.write_page(address, page).await?;
            block_index += 1;
            address += reg::PAGE_STRIDE;
          }
          None => {
            info!("a96t3x6: wrote {} pages", block_index);
            state = UpdateState::ReadChecksum;
          }
        },

        UpdateState::ReadChecksum => {
          device_checksum = self.read_flash_checksum().await?;
          state = UpdateState::ExitBootMode;
        }

        UpdateState::ExitBootMode => {
          self.bus.raw_send(&reg::CMD_EXIT_BOOT).await?;
          state = UpdateState::PowerCycle;
        }

        UpdateState::PowerCycle => {
          self.power_cycle().await;
          self.sleep_ms(reg::RESET_DELAY_MS).await;
          state = UpdateState::VerifyVersion;
        }

        UpdateState::VerifyVersion => match self.verify(image, device_checksum).await {
          Ok(()) => return Ok(()),
          Err(e) => {
            retries_remaining -= 1;
            if retries_remaining == 0 {
              warn!("a96t3x6: flash verify failed, retries exhausted: {:?}", e);
              return Err(e);
            }
            warn!("a96t3x6: flash verify failed, retrying session: {:?}", e);
            state = UpdateState::EnterBootMode;
          }
        },
      }
    }
  }

  /// Post-flash verification. External-media images have no trusted
  /// reference, so only built-in images enforce checksum and version
  /// equality; a zero or unreadable version fails either way.
  async fn verify(&self, image: &FirmwareImage<'_>, device_checksum: u16) -> Result<(), Error<E>> {
    let builtin = image.source == FirmwareSource::Builtin;
    if builtin && device_checksum != image.checksum() {
      return Err(Error::ChecksumMismatch { device: device_checksum, image: image.checksum() });
    }
    let (fw, _md) = self.read_firmware_version(true).await?;
    if fw == 0 {
      return Err(Error::VersionMismatch { device: 0, image: image.firmware_revision() });
    }
    if builtin && fw != image.firmware_revision() {
      return Err(Error::VersionMismatch { device: fw, image: image.firmware_revision() });
    }
    let [hi, lo] = device_checksum.to_be_bytes();
    self.with_state(|s| s.checksum = (hi, lo));
    info!("a96t3x6: flash verified, fw 0x{:02x} checksum 0x{:04x}", fw, device_checksum);
    Ok(())
  }

  /// Power-cycle into boot mode and check the unlock acknowledgment. Each
  /// attempt gets a fresh power cycle, so no inter-attempt backoff is needed.
  async fn enter_boot_mode(&self) -> Result<(), Error<E>> {
    retry!(reg::BOOT_RETRY_ATTEMPTS, (), self.try_enter_boot().await)
  }

  async fn try_enter_boot(&self) -> Result<(), Error<E>> {
    self.power_cycle().await;
    self.sleep_ms(reg::BOOT_DELAY_MS).await;
    self.bus.raw_send(&reg::CMD_ENTER_BOOT).await?;
    let mut ack = [0u8; 1];
    self.bus.raw_recv(&mut ack).await?;
    if ack[0] == self.config.boot_ack {
      Ok(())
    } else {
      Err(Error::UnexpectedResponse(ack[0]))
    }
  }

  /// Write one 32-byte flash page: 2 opcode bytes + big-endian address + data,
  /// 36 bytes on the wire, then poll the busy byte until it clears.
  async fn write_page(&self, address: u16, page: &[u8]) -> Result<(), Error<E>> {
    let mut frame = [0u8; reg::PAGE_FRAME_LEN];
    frame[..2].copy_from_slice(&reg::CMD_PAGE_WRITE);
    frame[2..4].copy_from_slice(&address.to_be_bytes());
    frame[4..].copy_from_slice(page);
    self.bus.raw_send(&frame).await?;
    self.sleep_ms(reg::PAGE_SETTLE_MS).await;

    let mut busy = [0u8; 1];
    for _ in 0..reg::BUSY_POLL_LIMIT {
      self.bus.raw_recv(&mut busy).await?;
      if busy[0] == 0 {
        return Ok(());
      }
    }
    // The device never reported idle; the next page write will show whether
    // the part wedged or is just slow.
    warn!("a96t3x6: page 0x{:04x} still busy after poll limit", address);
    Ok(())
  }

  /// Read the device-computed flash checksum (bytes 4–5 of the reply).
  async fn read_flash_checksum(&self) -> Result<u16, Error<E>> {
    self.bus.raw_send(&reg::CMD_READ_CHECKSUM).await?;
    self.sleep_ms(reg::CHECKSUM_STEP_MS).await;
    self.bus.raw_send(&reg::CMD_CHECKSUM_TRIGGER).await?;
    self.sleep_ms(reg::CHECKSUM_STEP_MS).await;
    let mut reply = [0u8; 6];
    self.bus.raw_recv(&mut reply).await?;
    Ok(u16::from_be_bytes([reply[4], reply[5]]))
  }

  /// Re-apply the pre-session sensing state after boot mode, refreshing the
  /// host's grip state the same way a fresh enable does.
  async fn restore_after_flash(&self) -> Result<(), Error<E>> {
    if !self.with_state(|s| s.enabled) {
      return Ok(());
    }
    self.bus.write(Reg::SarEnable, reg::CMD_ON).await?;
    self.check_first_status().await;
    Ok(())
  }

  async fn publish_status(&self, status: UpdateStatus) {
    self.with_state(|s| s.update_status = status);
    self.platform.lock().await.publish_update_status(status);
  }
}
