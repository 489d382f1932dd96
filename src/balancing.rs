//! Passive bleed balancing selection.
//!
//! Each BMB shares bleed hardware between adjacent bricks, so two
//! neighbouring channels must never discharge at the same time. The
//! selector picks the highest bricks first and skips any brick whose
//! neighbour already won a slot this cycle.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BLEED_FLOOR_VOLTAGE, BLEED_HYSTERESIS_V, BLEED_MAX_TEMP_C, CELLS_PER_BMB,
};
use crate::telemetry::{BmbTelemetry, SensorStatus};

/// One brick voltage tagged with its channel index, the unit the sort and
/// selection work over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brick {
    pub index: usize,
    pub voltage: f32,
}

/// Requested versus granted bleed channels for one BMB.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BalancingState {
    /// Channels that qualified for bleeding this cycle.
    pub requested: [bool; CELLS_PER_BMB],
    /// Channels actually switched on after adjacency arbitration.
    pub enabled: [bool; CELLS_PER_BMB],
}

/// Index at which `voltage` keeps `bricks[..len]` sorted ascending.
fn insert_position(bricks: &[Brick], voltage: f32) -> usize {
    let mut low = 0;
    let mut high = bricks.len();
    while low < high {
        let mid = (low + high) / 2;
        if bricks[mid].voltage <= voltage {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

/// Sort bricks ascending by voltage. Insertion sort with a binary search
/// for the slot, stable over equal voltages.
pub fn sort_bricks(bricks: &mut Vec<Brick>) {
    for i in 1..bricks.len() {
        let brick = bricks[i];
        let pos = insert_position(&bricks[..i], brick.voltage);
        bricks.copy_within(pos..i, pos + 1);
        bricks[pos] = brick;
    }
}

/// The voltage bricks are bled down towards. Never below the floor, even
/// when the weakest brick in the pack sits lower.
pub fn bleed_target(pack_min_voltage: f32) -> f32 {
    pack_min_voltage.max(BLEED_FLOOR_VOLTAGE)
}

/// Pick the bleed channels for one BMB.
///
/// A channel qualifies when its sensor is good, its lead is intact, its
/// voltage clears the target by the hysteresis band, and the board is cool
/// enough to dump heat into. Among qualifiers the highest voltages win,
/// subject to the no-adjacent-channels rule.
pub fn select_bleed_bricks(bmb: &BmbTelemetry, target: f32) -> BalancingState {
    let mut state = BalancingState::default();

    if bmb.board_temp_status == SensorStatus::Good && bmb.board_temp > BLEED_MAX_TEMP_C {
        return state;
    }

    let mut candidates: Vec<Brick> = Vec::with_capacity(CELLS_PER_BMB);
    for index in 0..CELLS_PER_BMB {
        if bmb.cell_voltage_status[index] != SensorStatus::Good || bmb.open_wire[index] {
            continue;
        }
        let voltage = bmb.cell_voltage[index];
        if voltage > target + BLEED_HYSTERESIS_V && voltage > BLEED_FLOOR_VOLTAGE {
            state.requested[index] = true;
            candidates.push(Brick { index, voltage });
        }
    }
    sort_bricks(&mut candidates);

    for brick in candidates.iter().rev() {
        let left_on = brick.index > 0 && state.enabled[brick.index - 1];
        let right_on = brick.index + 1 < CELLS_PER_BMB && state.enabled[brick.index + 1];
        if !left_on && !right_on {
            state.enabled[brick.index] = true;
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bmb_with_voltages(voltages: [f32; CELLS_PER_BMB]) -> BmbTelemetry {
        let mut bmb = BmbTelemetry::default();
        bmb.cell_voltage = voltages;
        bmb.cell_voltage_status = [SensorStatus::Good; CELLS_PER_BMB];
        bmb.board_temp = 25.0;
        bmb.board_temp_status = SensorStatus::Good;
        bmb
    }

    #[test]
    fn sort_orders_ascending_and_keeps_indices() {
        let mut bricks = vec![
            Brick { index: 0, voltage: 3.9 },
            Brick { index: 1, voltage: 3.7 },
            Brick { index: 2, voltage: 4.1 },
            Brick { index: 3, voltage: 3.8 },
            Brick { index: 4, voltage: 3.8 },
        ];
        sort_bricks(&mut bricks);
        let voltages: Vec<f32> = bricks.iter().map(|b| b.voltage).collect();
        assert_eq!(voltages, vec![3.7, 3.8, 3.8, 3.9, 4.1]);
        // stable over the duplicate pair
        assert_eq!(bricks[1].index, 3);
        assert_eq!(bricks[2].index, 4);
    }

    #[test]
    fn no_adjacent_channels_enabled() {
        let mut voltages = [3.5; CELLS_PER_BMB];
        for (i, v) in voltages.iter_mut().enumerate() {
            *v = 3.9 + 0.01 * i as f32;
        }
        let bmb = bmb_with_voltages(voltages);
        let state = select_bleed_bricks(&bmb, 3.8);
        for i in 0..CELLS_PER_BMB - 1 {
            assert!(!(state.enabled[i] && state.enabled[i + 1]));
        }
        // every skipped qualifier must have a winning neighbour
        for i in 0..CELLS_PER_BMB {
            if state.requested[i] && !state.enabled[i] {
                let left = i > 0 && state.enabled[i - 1];
                let right = i + 1 < CELLS_PER_BMB && state.enabled[i + 1];
                assert!(left || right);
            }
        }
    }

    #[test]
    fn highest_brick_wins_over_neighbour() {
        let mut voltages = [3.5; CELLS_PER_BMB];
        voltages[4] = 3.90;
        voltages[5] = 3.95;
        let bmb = bmb_with_voltages(voltages);
        let state = select_bleed_bricks(&bmb, 3.8);
        assert!(!state.enabled[4]);
        assert!(state.enabled[5]);
    }

    #[test]
    fn hot_board_bleeds_nothing() {
        let mut bmb = bmb_with_voltages([4.0; CELLS_PER_BMB]);
        bmb.board_temp = BLEED_MAX_TEMP_C + 1.0;
        let state = select_bleed_bricks(&bmb, 3.8);
        assert_eq!(state.requested, [false; CELLS_PER_BMB]);
        assert_eq!(state.enabled, [false; CELLS_PER_BMB]);
    }

    #[test]
    fn target_never_drops_below_floor() {
        assert_eq!(bleed_target(3.2), BLEED_FLOOR_VOLTAGE);
        assert_eq!(bleed_target(3.8), 3.8);
    }

    #[test]
    fn bricks_inside_hysteresis_band_stay_off() {
        let mut voltages = [3.5; CELLS_PER_BMB];
        voltages[0] = 3.8 + BLEED_HYSTERESIS_V / 2.0;
        voltages[1] = 3.8 + BLEED_HYSTERESIS_V * 2.0;
        let bmb = bmb_with_voltages(voltages);
        let state = select_bleed_bricks(&bmb, 3.8);
        assert!(!state.requested[0]);
        assert!(state.requested[1]);
    }
}
