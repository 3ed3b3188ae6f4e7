/******************************************************************************
 * Refer to the ABOV A96T3X6 series datasheet for more information:           *
 * - https://www.abovsemi.com/                                                *
 * ========================================================================== *
 *               A96T3X6 - Registers, Commands & Timing Budget                *
*******************************************************************************/

pub(crate) const I2C_ADDR: u8 = 0x20;

#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reg {
  /// Grip interrupt status (1 byte).
  BtnStatus = 0x00,
  /// Firmware revision (1 byte).
  FwVer = 0x02,
  /// Model revision (1 byte).
  ModelNo = 0x03,

  /// Total capacitance measurement trigger.
  SarTotalCap = 0x16,
  /// Total capacitance readback (2 bytes, big-endian).
  SarTotalCapRead = 0x18,
  /// Capacitance delta, main + reference channel (two big-endian pairs).
  SarDiffData = 0x1A,
  /// Capacitance baseline (2 bytes, big-endian).
  SarBaseline = 0x1E,
  /// Raw capacitance, main + reference channel (two big-endian pairs).
  SarRawData = 0x20,
  /// Press threshold at +0/+1, release threshold at +2/+3 (big-endian pairs).
  SarThreshold = 0x24,
  /// Noise threshold (2 bytes, big-endian).
  SarNoiseThreshold = 0x28,

  /// Grip sensing enable command register.
  SarEnable = 0x2A,
  /// Sar-only (approach-detection-only) mode command register.
  SarMode = 0x2B,
  /// Sensing on/off command register.
  SarSensing = 0x2C,
  /// Always-active mode command register.
  GripAlwaysActive = 0x2D,
  /// Software reset command register.
  SwReset = 0x2E,
  /// Charger/USB noise suppression register.
  Tspta = 0x30,
}

impl From<Reg> for u8 {
  #[inline]
  fn from(r: Reg) -> Self {
    r as u8
  }
}

// On/off command payloads shared by the command registers.
pub(crate) const CMD_ON: u8 = 0x20;
pub(crate) const CMD_OFF: u8 = 0x10;
pub(crate) const CMD_SW_RESET: u8 = 0x10;

/// Value reported by [`Reg::SwReset`] once a software reset has settled.
pub(crate) const SW_RESET_READY: u8 = 0x20;
/// Value reported by [`Reg::GripAlwaysActive`] once always-active mode is up.
pub(crate) const ALWAYS_ACTIVE_READY: u8 = 0x00;
/// Trigger byte written to [`Reg::SarTotalCap`] before a capacitance read.
pub(crate) const TOTAL_CAP_TRIGGER: u8 = 0x20;

// Boot-mode protocol. Flash commands are raw frames with a 0xAC marker, no
// register address.
pub(crate) const CMD_ENTER_BOOT: [u8; 2] = [0xAC, 0x5B];
pub(crate) const CMD_FLASH_ERASE: [u8; 2] = [0xAC, 0x2D];
pub(crate) const CMD_EXIT_BOOT: [u8; 2] = [0xAC, 0xE1];
pub(crate) const CMD_PAGE_WRITE: [u8; 2] = [0xAC, 0x7A];
pub(crate) const CMD_READ_CHECKSUM: [u8; 6] = [0xAC, 0x9E, 0x10, 0x00, 0x3F, 0xFF];
pub(crate) const CMD_CHECKSUM_TRIGGER: [u8; 1] = [0x00];

/// First flash address of user code. The 32-byte image header that precedes it
/// is parsed on the host and never written to the device.
pub(crate) const USER_CODE_ADDRESS: u16 = 0x0800;
pub(crate) const PAGE_SIZE: usize = 32;
pub(crate) const PAGE_FRAME_LEN: usize = 36;
pub(crate) const PAGE_STRIDE: u16 = 0x20;

// Retry budgets.
pub(crate) const BUS_RETRY_ATTEMPTS: u8 = 3;
pub(crate) const BOOT_RETRY_ATTEMPTS: u8 = 5;
pub(crate) const OUTER_RETRY_ATTEMPTS: u8 = 2;
pub(crate) const ALWAYS_ACTIVE_ATTEMPTS: u8 = 3;
pub(crate) const BUSY_POLL_LIMIT: u32 = 1000;
pub(crate) const SW_RESET_READY_ATTEMPTS: u8 = 10;

// Timings, in milliseconds.
pub(crate) const BUS_RETRY_BACKOFF_MS: u32 = 10;
pub(crate) const ALWAYS_ACTIVE_POLL_MS: u32 = 20;
pub(crate) const MODE_SETTLE_MS: u32 = 40;
pub(crate) const SW_RESET_SETTLE_MS: u32 = 35;
pub(crate) const SW_RESET_READY_FIRST_MS: u32 = 500;
pub(crate) const SW_RESET_READY_POLL_MS: u32 = 100;
pub(crate) const POWER_OFF_MS: u32 = 50;
pub(crate) const BOOT_DELAY_MS: u32 = 45;
pub(crate) const RESET_DELAY_MS: u32 = 150;
pub(crate) const FLASH_ERASE_SETTLE_MS: u32 = 1400;
pub(crate) const PAGE_SETTLE_MS: u32 = 3;
pub(crate) const CHECKSUM_STEP_MS: u32 = 5;
pub(crate) const TOTAL_CAP_SETTLE_MS: u32 = 10;

/// Firmware revisions above this value identify test builds, which are always
/// replaced by the bundled release image.
pub(crate) const TEST_FIRMWARE_DETECT_VER: u8 = 0xA0;
