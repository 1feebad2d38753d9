use crate::context::Context;
use crate::control::{armoury, services};
use crate::detect::{battery, hwmon};
use serde::Serialize;

/// Point-in-time system status. Field order is the output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub power_profile: String,
    pub gpu_mode: String,
    pub charge_limit: String,
    pub turbo_enabled: String,
    pub cpu_fan_speed: String,
    pub gpu_fan_speed: String,
    pub cpu_temperature: String,
    pub panel_overdrive: String,
    pub charge_mode: String,
    pub battery_charging_status: String,
    pub current_refresh_rate: String,
    pub asusctl_status: String,
    pub supergfxd_status: String,
    pub nvidia_powerd_status: String,
}

impl StatusReport {
    pub fn lines(&self) -> [&str; 14] {
        [
            &self.power_profile,
            &self.gpu_mode,
            &self.charge_limit,
            &self.turbo_enabled,
            &self.cpu_fan_speed,
            &self.gpu_fan_speed,
            &self.cpu_temperature,
            &self.panel_overdrive,
            &self.charge_mode,
            &self.battery_charging_status,
            &self.current_refresh_rate,
            &self.asusctl_status,
            &self.supergfxd_status,
            &self.nvidia_powerd_status,
        ]
        .map(String::as_str)
    }
}

fn or_unavailable<T: ToString>(what: &str, value: crate::error::Result<T>) -> String {
    match value {
        Ok(v) => v.to_string(),
        Err(e) => {
            tracing::debug!("{} unavailable: {}", what, e);
            hwmon::UNAVAILABLE.to_string()
        }
    }
}

/// Query every source independently; a failing source only blanks its own field.
pub fn collect(ctx: &Context) -> StatusReport {
    let power_profile = or_unavailable(
        "power profile",
        ctx.power_profile().and_then(|p| p.active()),
    );
    let gpu_mode = or_unavailable("GPU mode", ctx.gpu().and_then(|g| g.mode()));

    let turbo_enabled = match ctx.turbo() {
        Ok(turbo) if turbo.status().enabled => "1",
        _ => "0",
    };

    let fans = hwmon::fan_speeds(ctx.sysfs());
    let cpu_temperature = hwmon::render_temperature(hwmon::cpu_temperature(ctx.sysfs()));

    // One armoury listing feeds both attributes.
    let listing = armoury::armoury_listing(ctx.runner());
    let charger = || battery::charging_type(ctx.sysfs());

    let service = |name: &str| services::service_state(ctx.runner(), name).to_string();
    let names = &ctx.config().services;

    StatusReport {
        power_profile,
        gpu_mode,
        charge_limit: ctx.charge_limit().current(),
        turbo_enabled: turbo_enabled.to_string(),
        cpu_fan_speed: fans.cpu_display(),
        gpu_fan_speed: fans.gpu_display(),
        cpu_temperature,
        panel_overdrive: armoury::panel_overdrive(listing.as_deref()),
        charge_mode: armoury::charge_mode(listing.as_deref(), charger),
        battery_charging_status: battery::charging_status(ctx.sysfs()).to_string(),
        current_refresh_rate: (ctx.display().current_rate() as i64).to_string(),
        asusctl_status: service(&names.asusd),
        supergfxd_status: service(&names.supergfxd),
        nvidia_powerd_status: service(&names.nvidia_powerd),
    }
}
