//! Capability traits for everything the driver needs from its surroundings:
//! supply rails, the interrupt line, event delivery and firmware images.

/// Grip state reported to the host after decoding an interrupt status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GripEvent {
  Press,
  Release,
}

/// Where a firmware image comes from.
///
/// Built-in images carry full safety checks after flashing; external-media
/// images (engineering drops pulled from removable storage) skip the
/// version-equality check because there is no trusted reference to compare
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirmwareSource {
  Builtin,
  ExternalMedia,
}

/// Progress of a firmware update, published for host-side consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateStatus {
  #[default]
  Pass,
  Downloading,
  Fail,
}

impl UpdateStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      UpdateStatus::Pass => "PASS",
      UpdateStatus::Downloading => "Downloading",
      UpdateStatus::Fail => "Fail",
    }
  }
}

/// Control over the sensor's supply rail.
///
/// Power cycling is part of normal operation (reset recovery, boot-mode
/// entry), so the driver requires it rather than treating it as optional.
#[allow(async_fn_in_trait)]
pub trait PowerControl {
  async fn power_on(&mut self);
  async fn power_off(&mut self);
}

/// Host services the driver calls out to.
///
/// All methods are synchronous notifications or queries; anything that takes
/// real time belongs behind [`PowerControl`].
pub trait Platform: PowerControl {
  /// Deliver a decoded grip event to the host input path.
  fn report(&mut self, event: GripEvent);

  /// Unmask the sensor interrupt line.
  fn irq_enable(&mut self);

  /// Mask the sensor interrupt line.
  fn irq_disable(&mut self);

  /// Allow or disallow the interrupt line to wake the system from suspend.
  fn irq_set_wake(&mut self, enable: bool);

  /// Hold (or release) a wakeup assertion while an event is being processed,
  /// so the system cannot suspend mid-handler.
  fn hold_wake(&mut self, held: bool);

  /// Whether the device enclosure is currently closed (lid/hall sensor).
  fn enclosure_closed(&mut self) -> bool;

  /// Publish the firmware update status for host-side consumers.
  fn publish_update_status(&mut self, status: UpdateStatus);
}

/// Source of firmware image bytes.
///
/// The returned slice only lives for the duration of one update attempt; the
/// driver never retains image bytes across attempts.
#[allow(async_fn_in_trait)]
pub trait FirmwareProvider {
  async fn load(&mut self, source: FirmwareSource) -> Option<&[u8]>;
}
