use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{debug, warn};

use crate::platform::{GripEvent, Platform};
use crate::reg::Reg;
use crate::A96t3x6;

/// Decode the interrupt status byte. The grip state lives in the two middle
/// bits; odd values are presses, even values are releases.
pub(crate) fn decode_status(status: u8) -> GripEvent {
  if ((status >> 4) & 0x3) % 2 == 1 {
    GripEvent::Press
  } else {
    GripEvent::Release
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
  /// Service a grip interrupt.
  ///
  /// Call from the task woken by the interrupt line. A wake assertion is held
  /// for the whole handler so the bus transaction cannot race a system
  /// suspend. A failed status read triggers a full reset instead of a stale
  /// event.
  pub async fn handle_interrupt(&self) {
    self.platform.lock().await.hold_wake(true);
    self.interrupt_body().await;
    self.platform.lock().await.hold_wake(false);
  }

  async fn interrupt_body(&self) {
    let status = match self.bus.read_u8(Reg::BtnStatus).await {
      Ok(status) => status,
      Err(e) => {
        warn!("a96t3x6: status read failed in interrupt, resetting: {:?}", e);
        if let Err(e) = self.reset().await {
          warn!("a96t3x6: reset after failed status read also failed: {:?}", e);
        }
        return;
      }
    };

    let event = decode_status(status);
    debug!("a96t3x6: irq status 0x{:02x} -> {:?}", status, event);

    let suppress = self.with_state(|s| {
      s.pressed = event == GripEvent::Press;
      s.skip_event
    });
    if !suppress {
      self.platform.lock().await.report(event);
    }

    self.read_diff().await;

    #[cfg(feature = "factory-diag")]
    self.with_state(|s| {
      if s.abnormal_mode {
        s.irq_count += 1;
        if event == GripEvent::Press && s.max_diff < s.diff {
          s.max_diff = s.diff;
        }
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;
  use embassy_sync::blocking_mutex::raw::NoopRawMutex;

  use super::decode_status;
  use crate::platform::GripEvent;
  use crate::reg::Reg;
  use crate::testing::{device, Op, Shared};
  use crate::Config;

  #[test]
  fn status_parity_decides_press_for_all_bytes() {
    for b in 0u8..=255 {
      let expected = match (b >> 4) & 0x3 {
        1 | 3 => GripEvent::Press,
        _ => GripEvent::Release,
      };
      assert_eq!(decode_status(b), expected, "status byte 0x{b:02x}");
    }
  }

  #[test]
  fn interrupt_reports_press_and_refreshes_diff() {
    let shared = Shared::new();
    shared.set_reg(Reg::BtnStatus as u8, 0x10);
    shared.set_reg16(Reg::SarDiffData as u8, 42);
    let dev = device::<NoopRawMutex>(&shared, Config::default());

    block_on(dev.handle_interrupt());

    assert_eq!(shared.count(|op| matches!(op, Op::Report(GripEvent::Press))), 1);
    assert_eq!(dev.state().diff, 42);
    assert!(dev.state().pressed);
  }

  #[test]
  fn interrupt_holds_wake_across_handler() {
    let shared = Shared::new();
    let dev = device::<NoopRawMutex>(&shared, Config::default());

    block_on(dev.handle_interrupt());

    let held = shared.position(|op| matches!(op, Op::HoldWake(true)));
    let released = shared.position(|op| matches!(op, Op::HoldWake(false)));
    let report = shared.position(|op| matches!(op, Op::Report(_)));
    assert!(held < report && report < released);
  }

  #[test]
  fn suppressed_events_are_not_forwarded() {
    let shared = Shared::new();
    shared.set_reg(Reg::BtnStatus as u8, 0x10);
    let dev = device::<NoopRawMutex>(&shared, Config::default());
    dev.set_event_suppression(true);

    block_on(dev.handle_interrupt());

    assert_eq!(shared.count(|op| matches!(op, Op::Report(_))), 0);
    // Diagnostics still refresh.
    assert_eq!(shared.count(|op| matches!(op, Op::I2cRead(a) if *a == Reg::SarDiffData as u8)), 1);
  }

  #[test]
  fn failed_status_read_triggers_reset_not_stale_event() {
    let shared = Shared::new();
    shared.fail_reads(3);
    let dev = device::<NoopRawMutex>(&shared, Config::default());

    block_on(dev.handle_interrupt());

    assert_eq!(shared.count(|op| matches!(op, Op::Report(_))), 0);
    assert_eq!(shared.count(|op| matches!(op, Op::PowerOff)), 1);
    assert_eq!(shared.count(|op| matches!(op, Op::PowerOn)), 1);
  }
}
