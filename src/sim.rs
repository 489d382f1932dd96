//! In-process chain simulator.
//!
//! Implements [`ChainBus`] over an array of modelled monitor nodes so the
//! whole stack, from frame building through dispatch and telemetry, runs
//! without hardware. Links between nodes can be broken and repaired, nodes
//! can reset or refuse writes, and replies can be corrupted, which is
//! enough to exercise every failover path.

use std::collections::{HashMap, HashSet};

use crate::constants::{
    ADC_OFFSET, ADC_RESOLUTION, BOARD_THERM_ADC_HIGH, BOARD_THERM_ADC_LOW,
    BOARD_THERM_TEMP_HIGH_C, BOARD_THERM_TEMP_LOW_C, CELLS_PER_BMB, CELLS_PER_REG,
    CMD_RESET_COUNTER, CMD_VERIFY_READ, COMMAND_COUNTER_MAX, COMMAND_COUNTER_MIN,
    COMMAND_FRAME_SIZE, DIE_TEMP_OFFSET_C, DIE_TEMP_VOLTS_PER_C, NODE_BLOCK_SIZE,
    READ_AUX_A, READ_AVG_CELL_REG, READ_CELL_REG, READ_FILT_CELL_REG, READ_SADC_REG,
    READ_STATUS_A, REGISTER_SIZE_BYTES, SPI_TIMEOUT_MS,
};
use crate::crc::{compute_command_crc, compute_data_crc, pack_data_crc};
use crate::error::SpiError;
use crate::frame::RegisterBlock;
use crate::transport::{ChainBus, Port};

/// Whether an opcode reads a register rather than writing or commanding.
fn is_read_command(cmd: u16) -> bool {
    cmd == CMD_VERIFY_READ
        || cmd == READ_STATUS_A
        || cmd == READ_AUX_A
        || READ_CELL_REG.contains(&cmd)
        || READ_AVG_CELL_REG.contains(&cmd)
        || READ_FILT_CELL_REG.contains(&cmd)
        || READ_SADC_REG.contains(&cmd)
}

fn bump(counter: u8) -> u8 {
    if counter >= COMMAND_COUNTER_MAX {
        COMMAND_COUNTER_MIN
    } else {
        counter + 1
    }
}

/// One modelled monitor node.
struct SimulatedNode {
    registers: HashMap<u16, RegisterBlock>,
    counter: u8,
    reject_writes: bool,
}

impl SimulatedNode {
    fn new() -> Self {
        SimulatedNode {
            registers: HashMap::new(),
            counter: 0,
            reject_writes: false,
        }
    }
}

/// A daisy chain of simulated nodes behind both ports.
///
/// Links are numbered `0..=node_count`: link 0 sits between port A and the
/// first node, link `i` between nodes `i - 1` and `i`, and the last link
/// between the final node and port B.
pub struct SimulatedChain {
    nodes: Vec<SimulatedNode>,
    broken_links: HashSet<usize>,
    port_failed: [bool; 2],
    corrupt_reads: u32,
}

impl SimulatedChain {
    pub fn new(node_count: usize) -> Self {
        SimulatedChain {
            nodes: (0..node_count).map(|_| SimulatedNode::new()).collect(),
            broken_links: HashSet::new(),
            port_failed: [false, false],
            corrupt_reads: 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes reachable when entering from `port`.
    pub fn reachable(&self, port: Port) -> usize {
        let n = self.nodes.len();
        match port {
            Port::A => (0..=n)
                .find(|link| self.broken_links.contains(link))
                .unwrap_or(n)
                .min(n),
            Port::B => {
                let highest_break = (0..=n)
                    .rev()
                    .find(|link| self.broken_links.contains(link))
                    .unwrap_or(0);
                n - highest_break
            }
        }
    }

    pub fn break_link(&mut self, link: usize) {
        self.broken_links.insert(link);
    }

    pub fn repair_link(&mut self, link: usize) {
        self.broken_links.remove(&link);
    }

    /// Make a port's transceiver fail every exchange with a timeout.
    pub fn fail_port(&mut self, port: Port, failed: bool) {
        self.port_failed[port.index()] = failed;
    }

    /// Corrupt the next `count` reply slots with a single payload bit flip.
    pub fn corrupt_reads(&mut self, count: u32) {
        self.corrupt_reads = count;
    }

    /// Node drops its command counter to zero, as after a power-on reset.
    pub fn reset_node(&mut self, node: usize) {
        self.nodes[node].counter = 0;
    }

    pub fn set_reject_writes(&mut self, node: usize, reject: bool) {
        self.nodes[node].reject_writes = reject;
    }

    pub fn node_counter(&self, node: usize) -> u8 {
        self.nodes[node].counter
    }

    pub fn set_register(&mut self, node: usize, cmd: u16, data: RegisterBlock) {
        self.nodes[node].registers.insert(cmd, data);
    }

    pub fn register(&self, node: usize, cmd: u16) -> RegisterBlock {
        self.nodes[node]
            .registers
            .get(&cmd)
            .copied()
            .unwrap_or([0; REGISTER_SIZE_BYTES])
    }

    /// Load one node's brick voltages into all four voltage banks.
    pub fn set_cell_voltages(&mut self, node: usize, voltages: &[f32; CELLS_PER_BMB]) {
        let banks = [
            READ_CELL_REG,
            READ_AVG_CELL_REG,
            READ_FILT_CELL_REG,
            READ_SADC_REG,
        ];
        for bank in banks {
            for (reg_index, &cmd) in bank.iter().enumerate() {
                let mut block = [0u8; REGISTER_SIZE_BYTES];
                for j in 0..CELLS_PER_REG {
                    let channel = reg_index * CELLS_PER_REG + j;
                    let raw = if channel < CELLS_PER_BMB {
                        ((voltages[channel] - ADC_OFFSET) / ADC_RESOLUTION) as u16
                    } else {
                        0x8000
                    };
                    block[j * 2..j * 2 + 2].copy_from_slice(&raw.to_le_bytes());
                }
                self.nodes[node].registers.insert(cmd, block);
            }
        }
    }

    /// Load one node's die temperature into the status register.
    pub fn set_die_temp(&mut self, node: usize, celsius: f32) {
        let volts = (celsius + DIE_TEMP_OFFSET_C) * DIE_TEMP_VOLTS_PER_C;
        let raw = (volts / ADC_RESOLUTION) as u16;
        let mut block = [0u8; REGISTER_SIZE_BYTES];
        block[..2].copy_from_slice(&raw.to_le_bytes());
        self.nodes[node].registers.insert(READ_STATUS_A, block);
    }

    /// Load one node's board thermistor temperature into the aux register.
    pub fn set_board_temp(&mut self, node: usize, celsius: f32) {
        let slope = (BOARD_THERM_TEMP_HIGH_C - BOARD_THERM_TEMP_LOW_C)
            / (BOARD_THERM_ADC_HIGH - BOARD_THERM_ADC_LOW) as f32;
        let raw =
            (BOARD_THERM_ADC_LOW as f32 + (celsius - BOARD_THERM_TEMP_LOW_C) / slope) as u16;
        let mut block = [0u8; REGISTER_SIZE_BYTES];
        block[..2].copy_from_slice(&raw.to_le_bytes());
        self.nodes[node].registers.insert(READ_AUX_A, block);
    }

    /// Physical node behind wire slot `slot` when entering from `port`.
    fn slot_node(&self, port: Port, slot: usize) -> usize {
        match port {
            Port::A => slot,
            Port::B => self.nodes.len() - 1 - slot,
        }
    }

    fn apply_command(&mut self, port: Port, cmd: u16) {
        let reach = self.reachable(port);
        for slot in 0..reach {
            let node = self.slot_node(port, slot);
            let state = &mut self.nodes[node];
            state.counter = if cmd == CMD_RESET_COUNTER {
                0
            } else {
                bump(state.counter)
            };
        }
    }

    fn apply_write(&mut self, port: Port, cmd: u16, tx: &[u8]) {
        let slots = (tx.len() - COMMAND_FRAME_SIZE) / NODE_BLOCK_SIZE;
        let reach = self.reachable(port);
        for slot in 0..slots.min(reach) {
            let node = self.slot_node(port, slot);
            let offset = COMMAND_FRAME_SIZE + slot * NODE_BLOCK_SIZE;
            let mut payload = [0u8; REGISTER_SIZE_BYTES];
            payload.copy_from_slice(&tx[offset..offset + REGISTER_SIZE_BYTES]);

            let state = &mut self.nodes[node];
            state.counter = bump(state.counter);
            if !state.reject_writes {
                state.registers.insert(cmd, payload);
                // verification reads return the most recently written page
                state.registers.insert(CMD_VERIFY_READ, payload);
            }
        }
    }

    fn fill_read(&mut self, port: Port, cmd: u16, rx: &mut [u8]) {
        let slots = (rx.len() - COMMAND_FRAME_SIZE) / NODE_BLOCK_SIZE;
        let reach = self.reachable(port);
        for slot in 0..slots {
            let offset = COMMAND_FRAME_SIZE + slot * NODE_BLOCK_SIZE;
            if slot >= reach {
                // nothing drives the bus past the break
                for byte in rx[offset..offset + NODE_BLOCK_SIZE].iter_mut() {
                    *byte = 0xFF;
                }
                continue;
            }
            let node = self.slot_node(port, slot);
            let mut payload = self.register(node, cmd);
            let counter = self.nodes[node].counter;
            let field = pack_data_crc(compute_data_crc(&payload, counter), counter);
            if self.corrupt_reads > 0 {
                self.corrupt_reads -= 1;
                payload[0] ^= 0x01;
            }
            rx[offset..offset + REGISTER_SIZE_BYTES].copy_from_slice(&payload);
            rx[offset + REGISTER_SIZE_BYTES..offset + NODE_BLOCK_SIZE]
                .copy_from_slice(&field.to_be_bytes());
        }
    }
}

impl ChainBus for SimulatedChain {
    fn assert_cs(&mut self, _port: Port) {}

    fn release_cs(&mut self, _port: Port) {}

    fn exchange(
        &mut self,
        port: Port,
        tx: &[u8],
        rx: &mut [u8],
    ) -> std::result::Result<(), SpiError> {
        if self.port_failed[port.index()] {
            return Err(SpiError::Timeout(SPI_TIMEOUT_MS));
        }
        if tx.len() < COMMAND_FRAME_SIZE || rx.len() != tx.len() {
            return Err(SpiError::Bus);
        }

        let cmd = u16::from_be_bytes([tx[0], tx[1]]);
        let crc = u16::from_be_bytes([tx[2], tx[3]]);
        if crc != compute_command_crc(&tx[..2]) {
            // nodes ignore a garbled command, the bus floats high
            for byte in rx.iter_mut() {
                *byte = 0xFF;
            }
            return Ok(());
        }

        if tx.len() == COMMAND_FRAME_SIZE {
            self.apply_command(port, cmd);
        } else if is_read_command(cmd) {
            self.fill_read(port, cmd, rx);
        } else {
            self.apply_write(port, cmd, tx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ring_reaches_every_node_from_both_ports() {
        let sim = SimulatedChain::new(4);
        assert_eq!(sim.reachable(Port::A), 4);
        assert_eq!(sim.reachable(Port::B), 4);
    }

    #[test]
    fn single_break_splits_the_ring() {
        let mut sim = SimulatedChain::new(4);
        sim.break_link(3);
        assert_eq!(sim.reachable(Port::A), 3);
        assert_eq!(sim.reachable(Port::B), 1);
    }

    #[test]
    fn entry_breaks_isolate_a_whole_port() {
        let mut sim = SimulatedChain::new(4);
        sim.break_link(0);
        assert_eq!(sim.reachable(Port::A), 0);
        assert_eq!(sim.reachable(Port::B), 4);

        sim.repair_link(0);
        sim.break_link(4);
        assert_eq!(sim.reachable(Port::A), 4);
        assert_eq!(sim.reachable(Port::B), 0);
    }

    #[test]
    fn commands_bump_counters_and_reset_zeroes_them() {
        let mut sim = SimulatedChain::new(2);
        let mut rx = [0u8; 4];
        let frame = crate::frame::command_frame(crate::constants::CMD_START_ADC);
        sim.exchange(Port::A, &frame, &mut rx).unwrap();
        assert_eq!(sim.node_counter(0), 1);
        assert_eq!(sim.node_counter(1), 1);

        let reset = crate::frame::command_frame(CMD_RESET_COUNTER);
        sim.exchange(Port::A, &reset, &mut rx).unwrap();
        assert_eq!(sim.node_counter(0), 0);
        assert_eq!(sim.node_counter(1), 0);
    }

    #[test]
    fn voltages_round_trip_through_the_encoding() {
        let mut sim = SimulatedChain::new(1);
        let mut voltages = [3.7f32; CELLS_PER_BMB];
        voltages[5] = 4.05;
        sim.set_cell_voltages(0, &voltages);

        let block = sim.register(0, READ_CELL_REG[1]);
        let raw = u16::from_le_bytes([block[4], block[5]]);
        let decoded = raw as f32 * ADC_RESOLUTION + ADC_OFFSET;
        assert!((decoded - 4.05).abs() < 0.001);
    }
}
