//! Host-test doubles: a scripted I²C device, a transcript-recording platform
//! and a canned firmware provider. Every hardware-visible action lands in one
//! ordered transcript so tests can assert on sequencing, not just counts.

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::platform::{FirmwareProvider, FirmwareSource, GripEvent, Platform, PowerControl, UpdateStatus};
use crate::reg;
use crate::{A96t3x6, Config};

const REG_SPACE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
  /// Two-byte register write `[addr, value]`.
  I2cWrite(u8, u8),
  /// Register read, by address.
  I2cRead(u8),
  /// 0xAC-framed boot command (first two bytes).
  RawCmd([u8; 2]),
  /// 36-byte page frame, decoded target address.
  PageWrite(u16),
  /// One-byte raw write (checksum trigger).
  Trigger,
  /// Address-less read of the given length.
  RawRead(usize),
  Report(GripEvent),
  IrqEnable,
  IrqDisable,
  IrqWake(bool),
  HoldWake(bool),
  PowerOn,
  PowerOff,
  Status(UpdateStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockBusError;

impl embedded_hal::i2c::Error for MockBusError {
  fn kind(&self) -> ErrorKind {
    ErrorKind::Other
  }
}

/// State shared between the mocks and the test body.
pub(crate) struct Shared {
  log: RefCell<heapless::Vec<Op, 512>>,
  regs: RefCell<[u8; REG_SPACE]>,
  pinned: RefCell<[bool; REG_SPACE]>,
  fail_reads: Cell<u32>,
  fail_writes: Cell<u32>,
  fail_page_writes: Cell<u32>,
  last_cmd: Cell<Option<[u8; 2]>>,
  boot_ack: Cell<u8>,
  checksum_reply: Cell<u16>,
  irq_enabled: Cell<bool>,
  enclosure: Cell<bool>,
}

impl Shared {
  pub(crate) fn new() -> Self {
    Self {
      log: RefCell::new(heapless::Vec::new()),
      regs: RefCell::new([0; REG_SPACE]),
      pinned: RefCell::new([false; REG_SPACE]),
      fail_reads: Cell::new(0),
      fail_writes: Cell::new(0),
      fail_page_writes: Cell::new(0),
      last_cmd: Cell::new(None),
      boot_ack: Cell::new(0x39),
      checksum_reply: Cell::new(0),
      irq_enabled: Cell::new(false),
      enclosure: Cell::new(false),
    }
  }

  pub(crate) fn set_reg(&self, addr: u8, value: u8) {
    self.regs.borrow_mut()[addr as usize] = value;
  }

  pub(crate) fn set_reg16(&self, addr: u8, value: u16) {
    let [hi, lo] = value.to_be_bytes();
    self.set_reg(addr, hi);
    self.set_reg(addr + 1, lo);
  }

  /// Pin a register to a value: driver writes to it are accepted on the wire
  /// but do not change what reads return.
  pub(crate) fn pin_reg(&self, addr: u8, value: u8) {
    self.set_reg(addr, value);
    self.pinned.borrow_mut()[addr as usize] = true;
  }

  pub(crate) fn reg(&self, addr: u8) -> u8 {
    self.regs.borrow()[addr as usize]
  }

  /// Fail the next `n` read transactions.
  pub(crate) fn fail_reads(&self, n: u32) {
    self.fail_reads.set(n);
  }

  /// Fail the next `n` write transactions.
  pub(crate) fn fail_writes(&self, n: u32) {
    self.fail_writes.set(n);
  }

  /// Fail the next `n` 36-byte page-frame sends, leaving other writes alone.
  pub(crate) fn fail_page_writes(&self, n: u32) {
    self.fail_page_writes.set(n);
  }

  pub(crate) fn set_boot_ack(&self, ack: u8) {
    self.boot_ack.set(ack);
  }

  pub(crate) fn set_checksum_reply(&self, checksum: u16) {
    self.checksum_reply.set(checksum);
  }

  pub(crate) fn set_enclosure(&self, closed: bool) {
    self.enclosure.set(closed);
  }

  pub(crate) fn irq_enabled(&self) -> bool {
    self.irq_enabled.get()
  }

  pub(crate) fn clear_log(&self) {
    self.log.borrow_mut().clear();
  }

  pub(crate) fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
    self.log.borrow().iter().filter(|op| pred(op)).count()
  }

  pub(crate) fn position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
    self.log.borrow().iter().position(|op| pred(op))
  }

  pub(crate) fn rposition(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
    self.log.borrow().iter().rposition(|op| pred(op))
  }

  /// Target addresses of all page frames, in wire order.
  pub(crate) fn page_addresses(&self) -> heapless::Vec<u16, 32> {
    self
      .log
      .borrow()
      .iter()
      .filter_map(|op| if let Op::PageWrite(addr) = op { Some(*addr) } else { None })
      .collect()
  }

  fn log(&self, op: Op) {
    self.log.borrow_mut().push(op).ok();
  }

  fn register_read(&self, addr: u8, buf: &mut [u8]) -> Result<(), MockBusError> {
    self.log(Op::I2cRead(addr));
    if self.fail_reads.get() > 0 {
      self.fail_reads.set(self.fail_reads.get() - 1);
      return Err(MockBusError);
    }
    let regs = self.regs.borrow();
    let start = addr as usize;
    buf.copy_from_slice(&regs[start..start + buf.len()]);
    Ok(())
  }

  fn wire_write(&self, frame: &[u8]) -> Result<(), MockBusError> {
    let failing = self.fail_writes.get() > 0;
    match frame {
      [_] => self.log(Op::Trigger),
      [0xAC, _, _, _, rest @ ..] if rest.len() == reg::PAGE_FRAME_LEN - 4 => {
        self.log(Op::PageWrite(u16::from_be_bytes([frame[2], frame[3]])));
        self.last_cmd.set(None);
        if self.fail_page_writes.get() > 0 {
          self.fail_page_writes.set(self.fail_page_writes.get() - 1);
          return Err(MockBusError);
        }
      }
      [0xAC, b1, ..] => {
        self.log(Op::RawCmd([0xAC, *b1]));
        self.last_cmd.set(Some([0xAC, *b1]));
      }
      [addr, value] => {
        self.log(Op::I2cWrite(*addr, *value));
        if !failing && !self.pinned.borrow()[*addr as usize] {
          self.regs.borrow_mut()[*addr as usize] = *value;
        }
      }
      _ => {}
    }
    if failing {
      self.fail_writes.set(self.fail_writes.get() - 1);
      return Err(MockBusError);
    }
    Ok(())
  }

  fn raw_read(&self, buf: &mut [u8]) -> Result<(), MockBusError> {
    self.log(Op::RawRead(buf.len()));
    if self.fail_reads.get() > 0 {
      self.fail_reads.set(self.fail_reads.get() - 1);
      return Err(MockBusError);
    }
    buf.fill(0);
    match (buf.len(), self.last_cmd.get()) {
      (1, Some(cmd)) if cmd == reg::CMD_ENTER_BOOT => {
        buf[0] = self.boot_ack.get();
        self.last_cmd.set(None);
      }
      (6, _) => {
        buf[4..6].copy_from_slice(&self.checksum_reply.get().to_be_bytes());
      }
      _ => {}
    }
    Ok(())
  }
}

pub(crate) struct MockBus<'a> {
  shared: &'a Shared,
}

impl<'a> MockBus<'a> {
  pub(crate) fn new(shared: &'a Shared) -> Self {
    Self { shared }
  }
}

impl ErrorType for MockBus<'_> {
  type Error = MockBusError;
}

impl I2c for MockBus<'_> {
  async fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), MockBusError> {
    match operations {
      [Operation::Write(cmd), Operation::Read(buf)] => self.shared.register_read(cmd[0], buf),
      [Operation::Write(frame)] => self.shared.wire_write(frame),
      [Operation::Read(buf)] => self.shared.raw_read(buf),
      _ => Ok(()),
    }
  }
}

#[derive(Clone)]
pub(crate) struct NoopDelay;

impl DelayNs for NoopDelay {
  async fn delay_ns(&mut self, _ns: u32) {}
}

pub(crate) struct MockPlatform<'a> {
  shared: &'a Shared,
}

impl PowerControl for MockPlatform<'_> {
  async fn power_on(&mut self) {
    self.shared.log(Op::PowerOn);
  }

  async fn power_off(&mut self) {
    self.shared.log(Op::PowerOff);
  }
}

impl Platform for MockPlatform<'_> {
  fn report(&mut self, event: GripEvent) {
    self.shared.log(Op::Report(event));
  }

  fn irq_enable(&mut self) {
    self.shared.irq_enabled.set(true);
    self.shared.log(Op::IrqEnable);
  }

  fn irq_disable(&mut self) {
    self.shared.irq_enabled.set(false);
    self.shared.log(Op::IrqDisable);
  }

  fn irq_set_wake(&mut self, enable: bool) {
    self.shared.log(Op::IrqWake(enable));
  }

  fn hold_wake(&mut self, held: bool) {
    self.shared.log(Op::HoldWake(held));
  }

  fn enclosure_closed(&mut self) -> bool {
    self.shared.enclosure.get()
  }

  fn publish_update_status(&mut self, status: UpdateStatus) {
    self.shared.log(Op::Status(status));
  }
}

pub(crate) struct MockProvider {
  builtin: Option<heapless::Vec<u8, 512>>,
  external: Option<heapless::Vec<u8, 512>>,
}

impl MockProvider {
  pub(crate) fn empty() -> Self {
    Self { builtin: None, external: None }
  }

  pub(crate) fn with_builtin(bytes: heapless::Vec<u8, 512>) -> Self {
    Self { builtin: Some(bytes), external: None }
  }

  pub(crate) fn with_external(bytes: heapless::Vec<u8, 512>) -> Self {
    Self { builtin: None, external: Some(bytes) }
  }
}

impl FirmwareProvider for MockProvider {
  async fn load(&mut self, source: FirmwareSource) -> Option<&[u8]> {
    match source {
      FirmwareSource::Builtin => self.builtin.as_deref(),
      FirmwareSource::ExternalMedia => self.external.as_deref(),
    }
  }
}

pub(crate) fn device<M: RawMutex>(
  shared: &Shared,
  config: Config,
) -> A96t3x6<M, MockBus<'_>, NoopDelay, MockPlatform<'_>> {
  A96t3x6::new(MockBus::new(shared), NoopDelay, MockPlatform { shared }, config)
}
