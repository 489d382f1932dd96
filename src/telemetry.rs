//! Telemetry acquisition and aggregation.
//!
//! The update driver pulls the cell voltage banks and temperature registers
//! from every BMB through the dispatch layer, decodes raw ADC counts into
//! volts and degrees, and reduces the result twice: per BMB over its cell
//! channels, then pack-wide over the per-BMB aggregates. Reduction only
//! consumes channels whose sensor status is good and whose sensing lead is
//! not open.

use serde::{Deserialize, Serialize};

use crate::chain::BmbChain;
use crate::constants::{
    ADC_OFFSET, ADC_RESOLUTION, BOARD_THERM_ADC_HIGH, BOARD_THERM_ADC_LOW,
    BOARD_THERM_TEMP_HIGH_C, BOARD_THERM_TEMP_LOW_C, CELLS_PER_BMB, CELLS_PER_REG,
    CMD_START_ADC, CMD_START_REDUNDANT_ADC, DIE_TEMP_OFFSET_C, DIE_TEMP_VOLTS_PER_C,
    MAX_ADC_READING, OPEN_WIRE_DELTA_V, RAILED_MARGIN_COUNTS, READ_AUX_A, READ_AVG_CELL_REG,
    READ_CELL_REG, READ_FILT_CELL_REG, READ_SADC_REG, READ_STATUS_A,
    THERM_RAILED_MARGIN_COUNTS,
};
use crate::error::Result;
use crate::frame::RegisterBlock;
use crate::transport::ChainBus;

/// Health of one sensor channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    /// No reading has been taken yet.
    #[default]
    Uninitialized,
    /// The last reading was plausible.
    Good,
    /// The last reading was railed or otherwise implausible.
    Bad,
}

/// Telemetry record of one BMB, overwritten every update cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmbTelemetry {
    /// C-ADC brick voltages.
    pub cell_voltage: [f32; CELLS_PER_BMB],
    /// Averaged brick voltages.
    pub cell_voltage_avg: [f32; CELLS_PER_BMB],
    /// Filtered brick voltages.
    pub cell_voltage_filtered: [f32; CELLS_PER_BMB],
    /// Redundant S-ADC brick voltages.
    pub cell_voltage_redundant: [f32; CELLS_PER_BMB],
    /// Per-channel sensor health.
    pub cell_voltage_status: [SensorStatus; CELLS_PER_BMB],
    /// Per-channel open-sensing-lead flags.
    pub open_wire: [bool; CELLS_PER_BMB],
    /// Board thermistor temperature, degrees Celsius.
    pub board_temp: f32,
    /// Health of the board thermistor channel.
    pub board_temp_status: SensorStatus,
    /// Monitor ASIC die temperature, degrees Celsius.
    pub die_temp: f32,
    /// Health of the die temperature channel.
    pub die_temp_status: SensorStatus,

    /// Highest good brick voltage on this board.
    pub max_cell_voltage: f32,
    /// Lowest good brick voltage on this board.
    pub min_cell_voltage: f32,
    /// Sum of good brick voltages on this board.
    pub sum_cell_voltage: f32,
    /// Average good brick voltage on this board.
    pub avg_cell_voltage: f32,
    /// Channels excluded from the reduction this cycle.
    pub num_bad_channels: usize,
}

impl Default for BmbTelemetry {
    fn default() -> Self {
        BmbTelemetry {
            cell_voltage: [0.0; CELLS_PER_BMB],
            cell_voltage_avg: [0.0; CELLS_PER_BMB],
            cell_voltage_filtered: [0.0; CELLS_PER_BMB],
            cell_voltage_redundant: [0.0; CELLS_PER_BMB],
            cell_voltage_status: [SensorStatus::Uninitialized; CELLS_PER_BMB],
            open_wire: [false; CELLS_PER_BMB],
            board_temp: 0.0,
            board_temp_status: SensorStatus::Uninitialized,
            die_temp: 0.0,
            die_temp_status: SensorStatus::Uninitialized,
            max_cell_voltage: 0.0,
            min_cell_voltage: 0.0,
            sum_cell_voltage: 0.0,
            avg_cell_voltage: 0.0,
            num_bad_channels: 0,
        }
    }
}

/// Pack-wide reduction over all BMBs' per-board aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackAggregates {
    /// Highest good brick voltage in the pack.
    pub max_cell_voltage: f32,
    /// Lowest good brick voltage in the pack.
    pub min_cell_voltage: f32,
    /// Average good brick voltage across the pack.
    pub avg_cell_voltage: f32,
    /// Sum of good brick voltages across the pack.
    pub sum_cell_voltage: f32,
    /// Hottest board temperature in the pack.
    pub max_board_temp: f32,
    /// Coldest board temperature in the pack.
    pub min_board_temp: f32,
    /// Average board temperature across the pack.
    pub avg_board_temp: f32,
    /// Total channels excluded from the reduction this cycle.
    pub num_bad_channels: usize,
}

/// Whether an ADC reading sits close enough to either rail to indicate a
/// failed sensor channel.
fn is_adc_railed(raw: u16) -> bool {
    raw < RAILED_MARGIN_COUNTS || raw > MAX_ADC_READING - RAILED_MARGIN_COUNTS
}

/// Convert a raw cell ADC count to volts.
fn adc_to_volts(raw: u16) -> f32 {
    raw as f32 * ADC_RESOLUTION + ADC_OFFSET
}

/// Unpack the three cell readings of one 6-byte register, LSB first.
fn decode_cell_register(block: &RegisterBlock) -> [u16; CELLS_PER_REG] {
    let mut cells = [0u16; CELLS_PER_REG];
    for (i, cell) in cells.iter_mut().enumerate() {
        *cell = u16::from_le_bytes([block[i * 2], block[i * 2 + 1]]);
    }
    cells
}

/// Die temperature from the status register.
fn decode_die_temp(block: &RegisterBlock) -> (f32, SensorStatus) {
    let raw = u16::from_le_bytes([block[0], block[1]]);
    if is_adc_railed(raw) {
        return (0.0, SensorStatus::Bad);
    }
    let volts = raw as f32 * ADC_RESOLUTION;
    (volts / DIE_TEMP_VOLTS_PER_C - DIE_TEMP_OFFSET_C, SensorStatus::Good)
}

/// Board thermistor temperature from the aux register, linear two-point
/// interpolation between the calibration constants.
fn decode_board_temp(block: &RegisterBlock) -> (f32, SensorStatus) {
    let raw = u16::from_le_bytes([block[0], block[1]]);
    if raw < THERM_RAILED_MARGIN_COUNTS || raw > MAX_ADC_READING - THERM_RAILED_MARGIN_COUNTS {
        return (0.0, SensorStatus::Bad);
    }
    let slope = (BOARD_THERM_TEMP_HIGH_C - BOARD_THERM_TEMP_LOW_C)
        / (BOARD_THERM_ADC_HIGH - BOARD_THERM_ADC_LOW) as f32;
    let temp = BOARD_THERM_TEMP_LOW_C + (raw as f32 - BOARD_THERM_ADC_LOW as f32) * slope;
    (temp, SensorStatus::Good)
}

/// Which voltage array of a BMB record a register bank fills.
enum VoltageBank {
    Cadc,
    Averaged,
    Filtered,
    Redundant,
}

fn decode_voltage_bank(
    bmbs: &mut [BmbTelemetry],
    bank: &VoltageBank,
    reg_index: usize,
    blocks: &[RegisterBlock],
) {
    for (node, block) in blocks.iter().enumerate() {
        let cells = decode_cell_register(block);
        for (j, &raw) in cells.iter().enumerate() {
            let channel = reg_index * CELLS_PER_REG + j;
            if channel >= CELLS_PER_BMB {
                break;
            }
            let bmb = &mut bmbs[node];
            match bank {
                VoltageBank::Cadc => {
                    // The C-ADC bank owns the channel status.
                    if is_adc_railed(raw) {
                        bmb.cell_voltage_status[channel] = SensorStatus::Bad;
                    } else {
                        bmb.cell_voltage[channel] = adc_to_volts(raw);
                        bmb.cell_voltage_status[channel] = SensorStatus::Good;
                    }
                }
                VoltageBank::Averaged => {
                    if !is_adc_railed(raw) {
                        bmb.cell_voltage_avg[channel] = adc_to_volts(raw);
                    }
                }
                VoltageBank::Filtered => {
                    if !is_adc_railed(raw) {
                        bmb.cell_voltage_filtered[channel] = adc_to_volts(raw);
                    }
                }
                VoltageBank::Redundant => {
                    if !is_adc_railed(raw) {
                        bmb.cell_voltage_redundant[channel] = adc_to_volts(raw);
                    }
                }
            }
        }
    }
}

/// Flag channels whose primary and redundant ADCs disagree: with the two
/// converters driven under different input conditions, a detached sensing
/// lead reads implausibly differently on each.
fn detect_open_wires(bmb: &mut BmbTelemetry) {
    for channel in 0..CELLS_PER_BMB {
        if bmb.cell_voltage_status[channel] != SensorStatus::Good {
            continue;
        }
        let delta = (bmb.cell_voltage[channel] - bmb.cell_voltage_redundant[channel]).abs();
        bmb.open_wire[channel] = delta > OPEN_WIRE_DELTA_V;
    }
}

/// Reduce one BMB's channels into its per-board aggregates.
///
/// Only channels that are good and not open-wire contribute. With zero good
/// channels the previous average is left untouched (no division by zero, no
/// spurious reset) and every channel is counted bad.
pub fn aggregate_bmb(bmb: &mut BmbTelemetry) {
    let mut max = f32::MIN;
    let mut min = f32::MAX;
    let mut sum = 0.0;
    let mut good = 0usize;
    for channel in 0..CELLS_PER_BMB {
        if bmb.cell_voltage_status[channel] != SensorStatus::Good || bmb.open_wire[channel] {
            continue;
        }
        let v = bmb.cell_voltage[channel];
        max = max.max(v);
        min = min.min(v);
        sum += v;
        good += 1;
    }
    bmb.num_bad_channels = CELLS_PER_BMB - good;
    if good == 0 {
        return;
    }
    bmb.max_cell_voltage = max;
    bmb.min_cell_voltage = min;
    bmb.sum_cell_voltage = sum;
    bmb.avg_cell_voltage = sum / good as f32;
}

/// Reduce all BMBs' per-board aggregates into pack-wide figures.
///
/// A pack with zero contributing boards leaves the previous aggregates
/// untouched apart from the bad-channel count.
pub fn aggregate_pack(bmbs: &[BmbTelemetry], pack: &mut PackAggregates) {
    let mut max_v = f32::MIN;
    let mut min_v = f32::MAX;
    let mut sum_v = 0.0;
    let mut max_t = f32::MIN;
    let mut min_t = f32::MAX;
    let mut sum_t = 0.0;
    let mut contributing = 0usize;
    let mut temps = 0usize;
    let mut bad = 0usize;

    for bmb in bmbs {
        bad += bmb.num_bad_channels;
        if bmb.num_bad_channels < CELLS_PER_BMB {
            max_v = max_v.max(bmb.max_cell_voltage);
            min_v = min_v.min(bmb.min_cell_voltage);
            sum_v += bmb.sum_cell_voltage;
            contributing += CELLS_PER_BMB - bmb.num_bad_channels;
        }
        if bmb.board_temp_status == SensorStatus::Good {
            max_t = max_t.max(bmb.board_temp);
            min_t = min_t.min(bmb.board_temp);
            sum_t += bmb.board_temp;
            temps += 1;
        }
    }

    pack.num_bad_channels = bad;
    if contributing > 0 {
        pack.max_cell_voltage = max_v;
        pack.min_cell_voltage = min_v;
        pack.sum_cell_voltage = sum_v;
        pack.avg_cell_voltage = sum_v / contributing as f32;
    }
    if temps > 0 {
        pack.max_board_temp = max_t;
        pack.min_board_temp = min_t;
        pack.avg_board_temp = sum_t / temps as f32;
    }
}

/// One full telemetry acquisition cycle over the chain.
///
/// Wakes the chain, reads every voltage bank and the temperature registers,
/// decodes them into `bmbs`, restarts the ADC conversions for the next
/// cycle, and refreshes the per-board aggregates.
pub fn update_telemetry<B: ChainBus>(
    chain: &mut BmbChain<B>,
    node_count: usize,
    bmbs: &mut [BmbTelemetry],
) -> Result<()> {
    chain.wake_chain(node_count);

    let banks: [(VoltageBank, [u16; crate::constants::NUM_CELL_REG]); 4] = [
        (VoltageBank::Cadc, READ_CELL_REG),
        (VoltageBank::Averaged, READ_AVG_CELL_REG),
        (VoltageBank::Filtered, READ_FILT_CELL_REG),
        (VoltageBank::Redundant, READ_SADC_REG),
    ];
    for (bank, registers) in &banks {
        for (reg_index, &cmd) in registers.iter().enumerate() {
            let blocks = chain.read_all(cmd, node_count)?;
            decode_voltage_bank(bmbs, bank, reg_index, &blocks);
        }
    }

    let status = chain.read_all(READ_STATUS_A, node_count)?;
    let aux = chain.read_all(READ_AUX_A, node_count)?;
    for (node, bmb) in bmbs.iter_mut().enumerate() {
        (bmb.die_temp, bmb.die_temp_status) = decode_die_temp(&status[node]);
        (bmb.board_temp, bmb.board_temp_status) = decode_board_temp(&aux[node]);
        detect_open_wires(bmb);
        aggregate_bmb(bmb);
    }

    chain.command_all(CMD_START_ADC, node_count)?;
    chain.command_all(CMD_START_REDUNDANT_ADC, node_count)?;
    Ok(())
}
