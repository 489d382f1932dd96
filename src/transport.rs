//! Physical port access and raw chain transactions.
//!
//! The chain has exactly two SPI entry points, port A and port B, each with
//! its own chip select. A [`ChainBus`] implementation supplies the
//! board-specific chip-select control and one blocking full-duplex exchange
//! bounded by [`SPI_TIMEOUT_MS`](crate::constants::SPI_TIMEOUT_MS); everything
//! above it is hardware-independent.
//!
//! The raw primitives in this module perform exactly one frame exchange over
//! one named port. CRC validation and command-counter extraction happen on
//! reads; recovery policy lives a layer up, in [`chain`](crate::chain).

use std::thread;
use std::time::Duration;

use crate::constants::{WAKE_PULSE_US, WAKE_SETTLE_US};
use crate::error::{BmsError, Result, SpiError};
use crate::frame::{self, RegisterBlock};

/// One of the two physical daisy-chain entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Port {
    /// Entry point at the first node of the chain
    A,
    /// Entry point at the last node of the chain
    B,
}

impl Port {
    /// The opposite entry point.
    pub fn other(self) -> Port {
        match self {
            Port::A => Port::B,
            Port::B => Port::A,
        }
    }

    /// Array index of this port in per-port state.
    pub(crate) fn index(self) -> usize {
        match self {
            Port::A => 0,
            Port::B => 1,
        }
    }

    /// Port B sees the physical ring from the far end, so its reply slots
    /// arrive in reverse chain order.
    pub(crate) fn reversed_slots(self) -> bool {
        self == Port::B
    }
}

/// Hardware seam: chip-select sequencing and one blocking SPI exchange.
///
/// Implementations must bound `exchange` by a fixed timeout and report
/// timeout or transport failure as [`SpiError`]; a failed exchange is
/// abandoned, never resumed.
pub trait ChainBus {
    /// Assert the chip select of `port`.
    fn assert_cs(&mut self, port: Port);

    /// Deassert the chip select of `port`.
    fn release_cs(&mut self, port: Port);

    /// One blocking full-duplex transfer on `port`. `tx` and `rx` are the
    /// same length.
    fn exchange(&mut self, port: Port, tx: &[u8], rx: &mut [u8]) -> std::result::Result<(), SpiError>;
}

/// Issue the wake pulse sequence on `port`: one chip-select pulse per node,
/// so the wake ripples down the whole chain before the first exchange.
pub(crate) fn wake_port<B: ChainBus>(bus: &mut B, port: Port, node_count: usize) {
    for _ in 0..node_count {
        bus.assert_cs(port);
        thread::sleep(Duration::from_micros(WAKE_PULSE_US));
        bus.release_cs(port);
        thread::sleep(Duration::from_micros(WAKE_SETTLE_US));
    }
}

/// One framed exchange with chip-select held for the duration.
fn framed_exchange<B: ChainBus>(bus: &mut B, port: Port, tx: &[u8], rx: &mut [u8]) -> Result<()> {
    bus.assert_cs(port);
    let result = bus.exchange(port, tx, rx);
    bus.release_cs(port);
    log::trace!("port {port:?} tx {tx:02X?}");
    log::trace!("port {port:?} rx {rx:02X?}");
    result.map_err(BmsError::from)
}

/// Header-only command broadcast over `port`.
pub(crate) fn send_command<B: ChainBus>(bus: &mut B, cmd: u16, port: Port) -> Result<()> {
    let tx = frame::command_frame(cmd);
    let mut rx = [0u8; 4];
    framed_exchange(bus, port, &tx, &mut rx)
}

/// Broadcast `payload` to `node_count` nodes over `port`. No response
/// validation at this layer; the verified layer confirms with a read-back.
pub(crate) fn write_register<B: ChainBus>(
    bus: &mut B,
    cmd: u16,
    node_count: usize,
    payload: &RegisterBlock,
    port: Port,
) -> Result<()> {
    let tx = frame::write_frame(cmd, payload, node_count);
    let mut rx = vec![0u8; tx.len()];
    framed_exchange(bus, port, &tx, &mut rx)
}

/// Read one register from each of `node_count` nodes over `port`.
///
/// Validates each slot's data CRC against the counter embedded by the
/// sender; returns payloads in chain order. If every slot's counter differs
/// from `expected_counter`, a zero counter means a node lost power
/// ([`BmsError::Por`]), anything else means a stale or duplicated reply
/// ([`BmsError::CommandCounter`]).
pub(crate) fn read_register<B: ChainBus>(
    bus: &mut B,
    cmd: u16,
    node_count: usize,
    port: Port,
    expected_counter: u8,
) -> Result<Vec<RegisterBlock>> {
    let tx = frame::read_frame(cmd, node_count);
    let mut rx = vec![0u8; tx.len()];
    framed_exchange(bus, port, &tx, &mut rx)?;

    let slots = frame::parse_read_frame(&rx, node_count, port.reversed_slots())?;
    if !slots.is_empty() && slots.iter().all(|&(_, counter)| counter != expected_counter) {
        if slots.iter().any(|&(_, counter)| counter == 0) {
            log::warn!("port {port:?}: zero command counter in reply, node reset detected");
            return Err(BmsError::Por);
        }
        let got = slots[0].1;
        log::debug!("port {port:?}: stale reply, counter {got} != expected {expected_counter}");
        return Err(BmsError::CommandCounter {
            expected: expected_counter,
            got,
        });
    }
    Ok(slots.into_iter().map(|(payload, _)| payload).collect())
}
