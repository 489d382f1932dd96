//! Protocol constants for the BMB daisy chain.
//!
//! This module defines the command opcodes, frame geometry, timing parameters
//! and conversion constants used on the two-port SPI chain, along with the
//! pack-level voltage and temperature thresholds consumed by the alert
//! monitor and the balancing selector.

/// Size of one register payload on the wire, in bytes.
pub const REGISTER_SIZE_BYTES: usize = 6;

/// Size of the command word plus its CRC at the head of every frame.
pub const COMMAND_FRAME_SIZE: usize = 4;

/// Size of one per-node block (register payload + data CRC).
pub const NODE_BLOCK_SIZE: usize = REGISTER_SIZE_BYTES + 2;

/// Number of series cell bricks monitored by one BMB.
pub const CELLS_PER_BMB: usize = 16;

/// Number of cell readings packed into one 6-byte register.
pub const CELLS_PER_REG: usize = 3;

/// Number of cell-voltage register groups per ADC bank.
pub const NUM_CELL_REG: usize = 6;

/// Start a C-ADC conversion cycle on all cell channels.
pub const CMD_START_ADC: u16 = 0x0360;

/// Start a redundant S-ADC conversion cycle on all cell channels.
pub const CMD_START_REDUNDANT_ADC: u16 = 0x0168;

/// Diagnostic read opcode (configuration register A). Doubles as the chain
/// enumeration probe and the confirmation read of the verified write path.
pub const CMD_VERIFY_READ: u16 = 0x0002;

/// Force every reachable node's command counter back to zero.
pub const CMD_RESET_COUNTER: u16 = 0x002E;

/// Configuration register A write opcode.
pub const CMD_WRITE_CONFIG_A: u16 = 0x0001;

/// C-ADC cell voltage register groups A-F, in read order.
pub const READ_CELL_REG: [u16; NUM_CELL_REG] = [0x0004, 0x0006, 0x0008, 0x000A, 0x0009, 0x000B];

/// Averaged cell voltage register groups A-F.
pub const READ_AVG_CELL_REG: [u16; NUM_CELL_REG] = [0x0044, 0x0046, 0x0048, 0x004A, 0x0049, 0x004B];

/// Filtered cell voltage register groups A-F.
pub const READ_FILT_CELL_REG: [u16; NUM_CELL_REG] = [0x0012, 0x0013, 0x0014, 0x0015, 0x0016, 0x0017];

/// Redundant S-ADC cell voltage register groups A-F.
pub const READ_SADC_REG: [u16; NUM_CELL_REG] = [0x0003, 0x0005, 0x0007, 0x000D, 0x000E, 0x000F];

/// Status register A (die temperature).
pub const READ_STATUS_A: u16 = 0x0030;

/// Auxiliary register A (board thermistor).
pub const READ_AUX_A: u16 = 0x0019;

/// Lowest valid rolling command counter value. Zero is reserved to signal a
/// power-on reset.
pub const COMMAND_COUNTER_MIN: u8 = 1;

/// Highest rolling command counter value before wrapping back to one.
pub const COMMAND_COUNTER_MAX: u8 = 63;

/// Upper bound on one blocking SPI exchange.
pub const SPI_TIMEOUT_MS: u64 = 50;

/// Chip-select low time of one wake pulse.
pub const WAKE_PULSE_US: u64 = 300;

/// Settle time between consecutive wake pulses.
pub const WAKE_SETTLE_US: u64 = 10;

/// Outer attempts of a verified command or register write.
pub const VERIFY_ATTEMPTS: usize = 3;

/// Confirmation read attempts within one verified attempt.
pub const CONFIRM_READ_ATTEMPTS: usize = 2;

/// Outer rounds of a dispatched chain operation before giving up.
pub const DISPATCH_ROUNDS: usize = 2;

/// Consecutive successful dual-port transactions before the chain is
/// unconditionally re-enumerated to detect a repaired link.
pub const DUAL_TRANSACTIONS_BEFORE_RETRY: u32 = 100;

/// Volts per ADC count of the cell voltage channels.
pub const ADC_RESOLUTION: f32 = 0.000_15;

/// Voltage offset of the cell voltage channels.
pub const ADC_OFFSET: f32 = 1.5;

/// Full-scale ADC reading.
pub const MAX_ADC_READING: u16 = 0xFFFF;

/// Readings within this many counts of either rail are treated as a failed
/// sensor channel.
pub const RAILED_MARGIN_COUNTS: u16 = 2500;

/// Die temperature slope, volts per degree Celsius.
pub const DIE_TEMP_VOLTS_PER_C: f32 = 0.0075;

/// Die temperature offset in degrees Celsius.
pub const DIE_TEMP_OFFSET_C: f32 = 273.0;

/// Rail margin for the board thermistor channel. The thermistor divider
/// keeps plausible readings in the low hundreds of counts, well inside the
/// cell-ADC rail margin, so it gets a rail check of its own.
pub const THERM_RAILED_MARGIN_COUNTS: u16 = 64;

/// Board thermistor calibration: ADC count at [`BOARD_THERM_TEMP_LOW_C`].
pub const BOARD_THERM_ADC_LOW: u16 = 0x0180;

/// Board thermistor calibration: ADC count at [`BOARD_THERM_TEMP_HIGH_C`].
pub const BOARD_THERM_ADC_HIGH: u16 = 0x022E;

/// Board thermistor temperature at the low ADC calibration point.
pub const BOARD_THERM_TEMP_LOW_C: f32 = 50.0;

/// Board thermistor temperature at the high ADC calibration point.
pub const BOARD_THERM_TEMP_HIGH_C: f32 = 35.0;

/// C-ADC and S-ADC readings of the same brick disagreeing by more than this
/// flag the sensing lead as open.
pub const OPEN_WIRE_DELTA_V: f32 = 0.1;

/// Never bleed a brick below this voltage.
pub const BLEED_FLOOR_VOLTAGE: f32 = 3.5;

/// A brick must exceed the bleed target by this margin to become a candidate.
pub const BLEED_HYSTERESIS_V: f32 = 0.01;

/// Bricks on a board hotter than this are never bled.
pub const BLEED_MAX_TEMP_C: f32 = 50.0;

/// Brick voltage above which the overvoltage warning condition is present.
pub const MAX_BRICK_WARNING_VOLTAGE: f32 = 4.3;

/// Brick voltage above which the overvoltage fault condition is present.
pub const MAX_BRICK_FAULT_VOLTAGE: f32 = 4.33;

/// Brick voltage below which the undervoltage warning condition is present.
pub const MIN_BRICK_WARNING_VOLTAGE: f32 = 3.1;

/// Brick voltage below which the undervoltage fault condition is present.
pub const MIN_BRICK_FAULT_VOLTAGE: f32 = 3.0;

/// Board temperature above which the overtemperature warning condition is
/// present.
pub const MAX_BRICK_TEMP_WARNING_C: f32 = 55.0;

/// Board temperature above which the overtemperature fault condition is
/// present.
pub const MAX_BRICK_TEMP_FAULT_C: f32 = 60.0;

pub(crate) const OVERVOLTAGE_WARNING_SET_TIME_MS: u32 = 1000;
pub(crate) const OVERVOLTAGE_WARNING_CLEAR_TIME_MS: u32 = 1000;
pub(crate) const OVERVOLTAGE_FAULT_SET_TIME_MS: u32 = 5000;
pub(crate) const OVERVOLTAGE_FAULT_CLEAR_TIME_MS: u32 = 5000;
pub(crate) const UNDERVOLTAGE_WARNING_SET_TIME_MS: u32 = 2000;
pub(crate) const UNDERVOLTAGE_WARNING_CLEAR_TIME_MS: u32 = 2000;
pub(crate) const UNDERVOLTAGE_FAULT_SET_TIME_MS: u32 = 5000;
pub(crate) const UNDERVOLTAGE_FAULT_CLEAR_TIME_MS: u32 = 5000;
pub(crate) const OVERTEMP_WARNING_SET_TIME_MS: u32 = 2000;
pub(crate) const OVERTEMP_WARNING_CLEAR_TIME_MS: u32 = 2000;
pub(crate) const OVERTEMP_FAULT_SET_TIME_MS: u32 = 5000;
pub(crate) const OVERTEMP_FAULT_CLEAR_TIME_MS: u32 = 5000;
