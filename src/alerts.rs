//! Debounced pack alerts.
//!
//! Each alert watches one boolean condition derived from the pack
//! aggregates and only transitions after the condition has held
//! continuously for its programmed set or clear time. Latching alerts stay
//! asserted once set until the whole monitor is rebooted or explicitly
//! acknowledged.

use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_BRICK_FAULT_VOLTAGE, MAX_BRICK_TEMP_FAULT_C, MAX_BRICK_TEMP_WARNING_C,
    MAX_BRICK_WARNING_VOLTAGE, MIN_BRICK_FAULT_VOLTAGE, MIN_BRICK_WARNING_VOLTAGE,
    OVERTEMP_FAULT_CLEAR_TIME_MS, OVERTEMP_FAULT_SET_TIME_MS, OVERTEMP_WARNING_CLEAR_TIME_MS,
    OVERTEMP_WARNING_SET_TIME_MS, OVERVOLTAGE_FAULT_CLEAR_TIME_MS, OVERVOLTAGE_FAULT_SET_TIME_MS,
    OVERVOLTAGE_WARNING_CLEAR_TIME_MS, OVERVOLTAGE_WARNING_SET_TIME_MS,
    UNDERVOLTAGE_FAULT_CLEAR_TIME_MS, UNDERVOLTAGE_FAULT_SET_TIME_MS,
    UNDERVOLTAGE_WARNING_CLEAR_TIME_MS, UNDERVOLTAGE_WARNING_SET_TIME_MS,
};
use crate::telemetry::PackAggregates;
use crate::timer::Timer;

/// Lifecycle state of one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    /// Condition absent, or debounce not yet satisfied.
    Cleared,
    /// A latching alert whose condition has since gone away.
    Latched,
    /// Condition held for the full set time.
    Set,
}

/// Mitigation a set alert demands from the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertResponse {
    InfoOnly,
    DisableBalancing,
    EmergencyBleed,
    DisableCharging,
    LimpMode,
    AmsFault,
}

/// OR-reduction of the responses demanded by every active alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertResponseSet {
    pub info_only: bool,
    pub disable_balancing: bool,
    pub emergency_bleed: bool,
    pub disable_charging: bool,
    pub limp_mode: bool,
    pub ams_fault: bool,
}

impl AlertResponseSet {
    fn insert(&mut self, response: AlertResponse) {
        match response {
            AlertResponse::InfoOnly => self.info_only = true,
            AlertResponse::DisableBalancing => self.disable_balancing = true,
            AlertResponse::EmergencyBleed => self.emergency_bleed = true,
            AlertResponse::DisableCharging => self.disable_charging = true,
            AlertResponse::LimpMode => self.limp_mode = true,
            AlertResponse::AmsFault => self.ams_fault = true,
        }
    }
}

/// One debounced alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    name: &'static str,
    latching: bool,
    status: AlertStatus,
    timer: Timer,
    set_time_ms: u32,
    clear_time_ms: u32,
    condition_present: bool,
    responses: &'static [AlertResponse],
}

impl Alert {
    pub fn new(
        name: &'static str,
        latching: bool,
        set_time_ms: u32,
        clear_time_ms: u32,
        responses: &'static [AlertResponse],
        now_ms: u32,
    ) -> Self {
        Alert {
            name,
            latching,
            status: AlertStatus::Cleared,
            timer: Timer::new(set_time_ms, now_ms),
            set_time_ms,
            clear_time_ms,
            condition_present: false,
            responses,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// Whether the alert currently demands its responses.
    pub fn active(&self) -> bool {
        matches!(self.status, AlertStatus::Set | AlertStatus::Latched)
    }

    pub fn responses(&self) -> &'static [AlertResponse] {
        self.responses
    }

    /// Record whether the watched condition holds right now. The debounce
    /// runs on the next [`Alert::update`].
    pub fn set_condition(&mut self, present: bool) {
        self.condition_present = present;
    }

    /// Advance the debounce state machine.
    ///
    /// While cleared (or latched) the timer accumulates whenever the
    /// condition is present and resets whenever it is not, so a momentary
    /// dropout restarts the whole set delay. The set state mirrors this for
    /// the clear delay. A zero set or clear time transitions only while the
    /// corresponding condition actually holds, not on every pass.
    pub fn update(&mut self, now_ms: u32) {
        match self.status {
            AlertStatus::Cleared | AlertStatus::Latched => {
                if self.condition_present {
                    self.timer.update(now_ms);
                } else {
                    self.timer.clear(now_ms);
                }
                if self.timer.expired()
                    && (self.timer.threshold_ms() > 0 || self.condition_present)
                {
                    log::warn!("alert set: {}", self.name);
                    self.status = AlertStatus::Set;
                    self.timer.configure(self.clear_time_ms, now_ms);
                }
            }
            AlertStatus::Set => {
                if self.condition_present {
                    self.timer.clear(now_ms);
                } else {
                    self.timer.update(now_ms);
                }
                if self.timer.expired()
                    && (self.timer.threshold_ms() > 0 || !self.condition_present)
                {
                    self.status = if self.latching {
                        log::warn!("alert latched: {}", self.name);
                        AlertStatus::Latched
                    } else {
                        log::info!("alert cleared: {}", self.name);
                        AlertStatus::Cleared
                    };
                    self.timer.configure(self.set_time_ms, now_ms);
                }
            }
        }
    }
}

const OVERVOLTAGE_WARNING_RESPONSE: &[AlertResponse] = &[AlertResponse::DisableCharging];
const OVERVOLTAGE_FAULT_RESPONSE: &[AlertResponse] = &[
    AlertResponse::DisableCharging,
    AlertResponse::EmergencyBleed,
    AlertResponse::AmsFault,
];
const UNDERVOLTAGE_WARNING_RESPONSE: &[AlertResponse] = &[AlertResponse::LimpMode];
const UNDERVOLTAGE_FAULT_RESPONSE: &[AlertResponse] =
    &[AlertResponse::LimpMode, AlertResponse::AmsFault];
const OVERTEMP_WARNING_RESPONSE: &[AlertResponse] = &[
    AlertResponse::DisableBalancing,
    AlertResponse::LimpMode,
];
const OVERTEMP_FAULT_RESPONSE: &[AlertResponse] = &[
    AlertResponse::DisableBalancing,
    AlertResponse::AmsFault,
];

/// The stock set of pack-level alerts, fed from the pack aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct PackAlerts {
    pub overvoltage_warning: Alert,
    pub overvoltage_fault: Alert,
    pub undervoltage_warning: Alert,
    pub undervoltage_fault: Alert,
    pub overtemp_warning: Alert,
    pub overtemp_fault: Alert,
}

impl PackAlerts {
    pub fn new(now_ms: u32) -> Self {
        PackAlerts {
            overvoltage_warning: Alert::new(
                "brick overvoltage warning",
                false,
                OVERVOLTAGE_WARNING_SET_TIME_MS,
                OVERVOLTAGE_WARNING_CLEAR_TIME_MS,
                OVERVOLTAGE_WARNING_RESPONSE,
                now_ms,
            ),
            overvoltage_fault: Alert::new(
                "brick overvoltage fault",
                true,
                OVERVOLTAGE_FAULT_SET_TIME_MS,
                OVERVOLTAGE_FAULT_CLEAR_TIME_MS,
                OVERVOLTAGE_FAULT_RESPONSE,
                now_ms,
            ),
            undervoltage_warning: Alert::new(
                "brick undervoltage warning",
                false,
                UNDERVOLTAGE_WARNING_SET_TIME_MS,
                UNDERVOLTAGE_WARNING_CLEAR_TIME_MS,
                UNDERVOLTAGE_WARNING_RESPONSE,
                now_ms,
            ),
            undervoltage_fault: Alert::new(
                "brick undervoltage fault",
                true,
                UNDERVOLTAGE_FAULT_SET_TIME_MS,
                UNDERVOLTAGE_FAULT_CLEAR_TIME_MS,
                UNDERVOLTAGE_FAULT_RESPONSE,
                now_ms,
            ),
            overtemp_warning: Alert::new(
                "board overtemp warning",
                false,
                OVERTEMP_WARNING_SET_TIME_MS,
                OVERTEMP_WARNING_CLEAR_TIME_MS,
                OVERTEMP_WARNING_RESPONSE,
                now_ms,
            ),
            overtemp_fault: Alert::new(
                "board overtemp fault",
                true,
                OVERTEMP_FAULT_SET_TIME_MS,
                OVERTEMP_FAULT_CLEAR_TIME_MS,
                OVERTEMP_FAULT_RESPONSE,
                now_ms,
            ),
        }
    }

    fn all_mut(&mut self) -> [&mut Alert; 6] {
        [
            &mut self.overvoltage_warning,
            &mut self.overvoltage_fault,
            &mut self.undervoltage_warning,
            &mut self.undervoltage_fault,
            &mut self.overtemp_warning,
            &mut self.overtemp_fault,
        ]
    }

    pub fn all(&self) -> [&Alert; 6] {
        [
            &self.overvoltage_warning,
            &self.overvoltage_fault,
            &self.undervoltage_warning,
            &self.undervoltage_fault,
            &self.overtemp_warning,
            &self.overtemp_fault,
        ]
    }

    /// Refresh every alert condition from the pack aggregates and advance
    /// the debounce machines.
    pub fn update(&mut self, pack: &PackAggregates, now_ms: u32) {
        self.overvoltage_warning
            .set_condition(pack.max_cell_voltage > MAX_BRICK_WARNING_VOLTAGE);
        self.overvoltage_fault
            .set_condition(pack.max_cell_voltage > MAX_BRICK_FAULT_VOLTAGE);
        self.undervoltage_warning
            .set_condition(pack.min_cell_voltage < MIN_BRICK_WARNING_VOLTAGE);
        self.undervoltage_fault
            .set_condition(pack.min_cell_voltage < MIN_BRICK_FAULT_VOLTAGE);
        self.overtemp_warning
            .set_condition(pack.max_board_temp > MAX_BRICK_TEMP_WARNING_C);
        self.overtemp_fault
            .set_condition(pack.max_board_temp > MAX_BRICK_TEMP_FAULT_C);
        for alert in self.all_mut() {
            alert.update(now_ms);
        }
    }

    /// The union of all mitigations currently demanded.
    pub fn responses(&self) -> AlertResponseSet {
        let mut set = AlertResponseSet::default();
        for alert in self.all() {
            if alert.active() {
                for &response in alert.responses() {
                    set.insert(response);
                }
            }
        }
        set
    }
}
