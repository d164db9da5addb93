//! Two-wire bus master protocol, driven directly against a hardware
//! transceiver (control, data and status registers).
//!
//! The transceiver itself is reached through the [`TwiRegisters`] trait so
//! the protocol state machine can run against a simulated device in tests.
//! [`TwiMaster`] implements the handshake; device drivers consume it through
//! the [`Bus`] trait and never touch status codes themselves.

use defmt::Format;

/// Hardware status codes latched by the transceiver after each phase.
///
/// The numbering follows the usual TWI controller convention: the upper five
/// bits of the status register, prescaler bits masked out.
pub mod status {
    /// Start condition transmitted.
    pub const START: u8 = 0x08;
    /// Repeated start condition transmitted.
    pub const REP_START: u8 = 0x10;
    /// Address + write bit transmitted, ACK received.
    pub const SLA_W_ACK: u8 = 0x18;
    /// Address + write bit transmitted, NACK received.
    pub const SLA_W_NACK: u8 = 0x20;
    /// Data byte transmitted, ACK received.
    pub const DATA_W_ACK: u8 = 0x28;
    /// Data byte transmitted, NACK received.
    pub const DATA_W_NACK: u8 = 0x30;
    /// Address + read bit transmitted, ACK received.
    pub const SLA_R_ACK: u8 = 0x40;
    /// Address + read bit transmitted, NACK received.
    pub const SLA_R_NACK: u8 = 0x48;
    /// Data byte received, ACK returned.
    pub const DATA_R_ACK: u8 = 0x50;
    /// Data byte received, NACK returned.
    pub const DATA_R_NACK: u8 = 0x58;
}

/// Transfer direction encoded in the address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

/// Acknowledge polarity for a received byte. ACK asks the device for more
/// data, NACK marks the final byte of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Ack {
    Ack,
    Nack,
}

/// Protocol phase, used to report where a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Phase {
    Start,
    AddressWrite,
    AddressRead,
    DataWrite,
    DataRead,
}

/// Status code the transceiver must report for a phase to have succeeded.
///
/// Reads are split by acknowledge polarity; the start phase additionally
/// accepts [`status::REP_START`], which the engine checks on its own.
pub const fn expected_status(phase: Phase, ack: Ack) -> u8 {
    match (phase, ack) {
        (Phase::Start, _) => status::START,
        (Phase::AddressWrite, _) => status::SLA_W_ACK,
        (Phase::AddressRead, _) => status::SLA_R_ACK,
        (Phase::DataWrite, _) => status::DATA_W_ACK,
        (Phase::DataRead, Ack::Ack) => status::DATA_R_ACK,
        (Phase::DataRead, Ack::Nack) => status::DATA_R_NACK,
    }
}

/// Bus-level failure. None of these are fatal to the driver; retry policy
/// belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum BusError {
    /// The transceiver never raised its transfer-complete flag within the
    /// spin bound.
    Timeout { phase: Phase },
    /// The transceiver reached a protocol state other than the expected one
    /// for this phase.
    UnexpectedStatus { phase: Phase, status: u8 },
    /// The device did not acknowledge its address. Distinct from a data
    /// NACK: the device is absent or busy.
    AddressNack { direction: Direction },
    /// A data byte was not acknowledged as expected. `index` is the position
    /// of the aborting byte within the multi-byte transfer; bytes before it
    /// were transferred.
    DataNack { index: usize },
    /// A buffered transfer delivered fewer bytes than requested. The
    /// byte-level engine never produces this; bus implementations that hand
    /// over whole buffers may.
    ShortTransfer { expected: usize, got: usize },
}

impl BusError {
    fn at_byte(self, index: usize) -> Self {
        match self {
            BusError::DataNack { .. } => BusError::DataNack { index },
            other => other,
        }
    }
}

impl embedded_hal::i2c::Error for BusError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            BusError::AddressNack { .. } => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            BusError::DataNack { .. } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

/// One start..stop sequence as seen by a device driver.
///
/// `start` doubles as repeated start when the bus is already held. After any
/// failure the controller state is undefined and the caller must issue
/// [`Bus::stop`] (or retry from `start`) to release the bus.
pub trait Bus {
    fn start(&mut self) -> Result<(), BusError>;
    fn address(&mut self, addr: u8, direction: Direction) -> Result<(), BusError>;
    fn write_byte(&mut self, byte: u8) -> Result<(), BusError>;
    fn read_byte(&mut self, ack: Ack) -> Result<u8, BusError>;
    /// Release the bus. Never blocks and never fails, so it is always
    /// available after a failed phase.
    fn stop(&mut self);

    /// Write a run of bytes, aborting at the first unacknowledged one. The
    /// error's `index` identifies that byte; `bytes.len() - index` were not
    /// sent.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        for (i, &byte) in bytes.iter().enumerate() {
            self.write_byte(byte).map_err(|e| e.at_byte(i))?;
        }
        Ok(())
    }

    /// Read `buf.len()` bytes, ACKing all but the last. Aborts at the first
    /// byte whose ACK/NACK status does not match, with its index.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let n = buf.len();
        for (i, slot) in buf.iter_mut().enumerate() {
            let ack = if i + 1 == n { Ack::Nack } else { Ack::Ack };
            *slot = self.read_byte(ack).map_err(|e| e.at_byte(i))?;
        }
        Ok(())
    }
}

/// Command written to the transceiver control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Command {
    /// Assert a (repeated) start condition.
    Start,
    /// Assert a stop condition and release the bus.
    Stop,
    /// Clock the data register out or in; `ack` selects whether a received
    /// byte is acknowledged.
    Transfer { ack: bool },
}

/// The hardware seam: a two-wire transceiver reduced to its control, data
/// and status registers.
pub trait TwiRegisters {
    /// Program the bus bit rate. Called once from [`TwiMaster::init`].
    fn set_bit_rate(&mut self, bitrate_hz: u32);
    /// Write the control register, clearing the transfer-complete flag and
    /// kicking off the next phase.
    fn command(&mut self, command: Command);
    /// Transfer-complete flag for the last issued command.
    fn transfer_complete(&self) -> bool;
    /// Status code latched for the last completed phase.
    fn status(&self) -> u8;
    fn write_data(&mut self, byte: u8);
    fn read_data(&self) -> u8;
}

/// Spin bound per phase. The reference behavior waits forever; a bound keeps
/// a dead device from locking up the sampling loop.
const DEFAULT_SPIN_LIMIT: u32 = 100_000;

/// Blocking two-wire master over a raw transceiver.
///
/// Single-owner: the sampling loop drives it synchronously, one phase at a
/// time, spin-waiting on the transfer-complete flag.
pub struct TwiMaster<R> {
    regs: R,
    spin_limit: u32,
}

impl<R: TwiRegisters> TwiMaster<R> {
    pub fn new(regs: R) -> Self {
        Self::with_spin_limit(regs, DEFAULT_SPIN_LIMIT)
    }

    pub fn with_spin_limit(regs: R, spin_limit: u32) -> Self {
        TwiMaster { regs, spin_limit }
    }

    /// Program the bus speed. Must run before the first transaction.
    pub fn init(&mut self, bitrate_hz: u32) {
        self.regs.set_bit_rate(bitrate_hz);
    }

    /// Hand the transceiver back.
    pub fn free(self) -> R {
        self.regs
    }

    fn wait(&mut self, phase: Phase) -> Result<u8, BusError> {
        for _ in 0..self.spin_limit {
            if self.regs.transfer_complete() {
                return Ok(self.regs.status());
            }
        }
        Err(BusError::Timeout { phase })
    }
}

impl<R: TwiRegisters> Bus for TwiMaster<R> {
    fn start(&mut self) -> Result<(), BusError> {
        self.regs.command(Command::Start);
        let st = self.wait(Phase::Start)?;
        if st == status::START || st == status::REP_START {
            Ok(())
        } else {
            Err(BusError::UnexpectedStatus {
                phase: Phase::Start,
                status: st,
            })
        }
    }

    fn address(&mut self, addr: u8, direction: Direction) -> Result<(), BusError> {
        let phase = match direction {
            Direction::Write => Phase::AddressWrite,
            Direction::Read => Phase::AddressRead,
        };
        let nack = match direction {
            Direction::Write => status::SLA_W_NACK,
            Direction::Read => status::SLA_R_NACK,
        };
        self.regs.write_data(addr << 1 | direction as u8);
        self.regs.command(Command::Transfer { ack: false });
        let st = self.wait(phase)?;
        if st == expected_status(phase, Ack::Ack) {
            Ok(())
        } else if st == nack {
            Err(BusError::AddressNack { direction })
        } else {
            // A status for the opposite direction cannot result from this
            // phase; report it verbatim instead of dressing it up as a NACK.
            Err(BusError::UnexpectedStatus { phase, status: st })
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), BusError> {
        self.regs.write_data(byte);
        self.regs.command(Command::Transfer { ack: false });
        let st = self.wait(Phase::DataWrite)?;
        if st == status::DATA_W_ACK {
            Ok(())
        } else if st == status::DATA_W_NACK {
            Err(BusError::DataNack { index: 0 })
        } else {
            Err(BusError::UnexpectedStatus {
                phase: Phase::DataWrite,
                status: st,
            })
        }
    }

    fn read_byte(&mut self, ack: Ack) -> Result<u8, BusError> {
        self.regs.command(Command::Transfer {
            ack: matches!(ack, Ack::Ack),
        });
        let st = self.wait(Phase::DataRead)?;
        if st == expected_status(Phase::DataRead, ack) {
            Ok(self.regs.read_data())
        } else if st == status::DATA_R_ACK || st == status::DATA_R_NACK {
            // The opposite acknowledge polarity came back.
            Err(BusError::DataNack { index: 0 })
        } else {
            Err(BusError::UnexpectedStatus {
                phase: Phase::DataRead,
                status: st,
            })
        }
    }

    fn stop(&mut self) {
        self.regs.command(Command::Stop);
    }
}
