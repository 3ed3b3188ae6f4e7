//! Periodic diagnostic poller.
//!
//! The poller is a host-spawned task driving [`A96t3x6::run_poller`]; the
//! driver only owns the start/stop handshake. Stopping is synchronous: it
//! waits for an in-flight tick to finish so no diagnostic read can race a
//! power-down.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use log::{info, warn};

use crate::platform::Platform;
use crate::A96t3x6;

pub(crate) const POLL_INTERVAL_MS: u32 = 2000;
pub(crate) const POLL_RESUME_MS: u32 = 1000;
/// Diff refresh happens every this many ticks to bound bus traffic.
pub(crate) const DIFF_REFRESH_TICKS: u32 = 10;

pub(crate) struct PollControl<M: RawMutex> {
  on: AtomicBool,
  busy: AtomicBool,
  kick: Signal<M, ()>,
  idle: Signal<M, ()>,
}

impl<M: RawMutex> PollControl<M> {
  pub(crate) fn new() -> Self {
    Self { on: AtomicBool::new(false), busy: AtomicBool::new(false), kick: Signal::new(), idle: Signal::new() }
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
  /// (Re)start the diagnostic poller. The first tick after a state change
  /// refreshes diff immediately instead of waiting out the refresh cadence.
  pub fn start_poller(&self) {
    self.with_state(|s| s.debug_count = DIFF_REFRESH_TICKS);
    self.poll.on.store(true, Ordering::Release);
    self.poll.kick.signal(());
  }

  /// Stop the poller and wait for any in-flight tick to complete.
  pub async fn stop_poller(&self) {
    self.poll.idle.reset();
    self.poll.on.store(false, Ordering::Release);
    if self.poll.busy.load(Ordering::Acquire) {
      self.poll.idle.wait().await;
    }
  }

  /// Poller task body. Spawn this on its own task with its own delay source;
  /// it never returns.
  pub async fn run_poller(&self, mut delay: D) -> ! {
    loop {
      if !self.poll.on.load(Ordering::Acquire) {
        self.poll.kick.wait().await;
        continue;
      }

      self.poll.busy.store(true, Ordering::Release);
      let next_ms = if self.poll.on.load(Ordering::Acquire) {
        self.poller_tick().await
      } else {
        POLL_INTERVAL_MS
      };
      self.poll.busy.store(false, Ordering::Release);
      if !self.poll.on.load(Ordering::Acquire) {
        self.poll.idle.signal(());
        continue;
      }

      delay.delay_ms(next_ms).await;
    }
  }

  /// One poller tick; returns the delay until the next one.
  pub(crate) async fn poller_tick(&self) -> u32 {
    // A deferred resume restores normal mode before diagnostics continue.
    if self.with_state(|s| core::mem::take(&mut s.resume_called)) {
      if let Err(e) = self.set_sar_only_mode(false).await {
        warn!("a96t3x6: resume mode restore failed: {:?}", e);
      }
      return POLL_RESUME_MS;
    }

    let closed = self.platform.lock().await.enclosure_closed();
    let closed_edge = self.with_state(|s| {
      let edge = closed && !s.prev_closed;
      s.prev_closed = closed;
      edge
    });
    if closed_edge {
      info!("a96t3x6: enclosure closed, software reset");
      if let Err(e) = self.grip_sw_reset().await {
        warn!("a96t3x6: poller software reset failed: {:?}", e);
      }
    }

    if self.with_state(|s| s.enabled) {
      let due = self.with_state(|s| {
        s.debug_count += 1;
        if s.debug_count >= DIFF_REFRESH_TICKS {
          s.debug_count = 0;
          true
        } else {
          false
        }
      });
      if due {
        self.read_diff().await;
      }
    }

    POLL_INTERVAL_MS
  }
}
