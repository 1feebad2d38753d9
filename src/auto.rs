use crate::context::Context;
use crate::control::armoury;
use crate::detect::battery::{self, BatteryChargingStatus};
use crate::error::{Error, Result};

const POWER_SAVING_RATE: u32 = 60;

/// Panel setting chosen from the battery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMode {
    /// 60 Hz, overdrive off.
    PowerSaving,
    /// Highest supported rate, overdrive on.
    Performance { rate: u32 },
}

impl AutoMode {
    pub fn rate(self) -> u32 {
        match self {
            AutoMode::PowerSaving => POWER_SAVING_RATE,
            AutoMode::Performance { rate } => rate,
        }
    }

    pub fn overdrive(self) -> bool {
        matches!(self, AutoMode::Performance { .. })
    }
}

/// Only a discharging battery selects power saving.
pub fn plan(status: BatteryChargingStatus, max_rate: u32) -> AutoMode {
    if status.is_discharging() {
        AutoMode::PowerSaving
    } else {
        AutoMode::Performance { rate: max_rate }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoOutcome {
    pub mode: AutoMode,
    pub battery: BatteryChargingStatus,
}

impl AutoOutcome {
    pub fn summary(&self) -> String {
        match self.mode {
            AutoMode::PowerSaving => {
                "Auto mode: Power Saving (60Hz + Panel overdrive OFF) - Battery discharging"
                    .to_string()
            }
            AutoMode::Performance { rate } => {
                let reason = match self.battery {
                    BatteryChargingStatus::AcCharging => "AC charging".to_string(),
                    BatteryChargingStatus::UsbPdCharging => "Type-C charging".to_string(),
                    BatteryChargingStatus::Full => "Fully charged".to_string(),
                    BatteryChargingStatus::NotCharging => "Plugged but not charging".to_string(),
                    other => format!("Battery status: {}", other),
                };
                format!(
                    "Auto mode: Performance ({}Hz + Panel overdrive ON) - {}",
                    rate, reason
                )
            }
        }
    }
}

/// Apply the refresh rate and panel overdrive matching the battery state.
/// Both steps are attempted; the run fails if either did.
pub fn run(ctx: &Context) -> Result<AutoOutcome> {
    let status = battery::charging_status(ctx.sysfs());
    let display = ctx.display();
    let mode = plan(status, display.max_rate());
    tracing::info!("auto mode {:?} for battery status {}", mode, status);

    let mut failures = Vec::new();
    if let Err(e) = display.set_rate(mode.rate() as f64) {
        tracing::warn!("auto mode: refresh rate not applied: {}", e);
        failures.push(format!("refresh rate: {}", e));
    }
    if let Err(e) = armoury::set_panel_overdrive(ctx.runner(), mode.overdrive()) {
        tracing::warn!("auto mode: panel overdrive not applied: {}", e);
        failures.push(format!("panel overdrive: {}", e));
    }

    if failures.is_empty() {
        Ok(AutoOutcome {
            mode,
            battery: status,
        })
    } else {
        Err(Error::Other(format!(
            "Error in auto mode: {}",
            failures.join("; ")
        )))
    }
}
