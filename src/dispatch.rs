//! Maps one parsed command onto one controller operation and renders the
//! result in the line-oriented format the UI reads.

use crate::auto;
use crate::cli::{Command, SleepLighting};
use crate::context::Context;
use crate::control::armoury;
use crate::control::charge;
use crate::control::gpu_mode::{GpuMode, UserAction};
use crate::control::lighting::{LedPower, Rgb};
use crate::control::services;
use crate::detect::{battery, gpu, hwmon};
use crate::error::Error;
use crate::status;
use anyhow::Result;
use serde::Serialize;
use std::io::Write;

fn truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

/// `null` (or a missing argument) leaves that limit alone.
fn optional_watts(label: &str, raw: Option<&str>) -> Result<Option<f64>> {
    match raw {
        None | Some("null") => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            Error::Validation(format!("Invalid {} value: {}", label, value)).into()
        }),
    }
}

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn run(ctx: &Context, command: Command, out: &mut dyn Write, json: bool) -> Result<()> {
    match command {
        Command::Status => {
            let report = status::collect(ctx);
            if json {
                print_json(out, &report)?;
            } else {
                for line in report.lines() {
                    writeln!(out, "{}", line)?;
                }
            }
        }

        Command::Profile { name } => {
            ctx.power_profile()?.set(&name.to_lowercase())?;
            writeln!(out, "Profile set to: {}", name)?;
        }

        Command::Gpu { mode } => {
            let mode: GpuMode = mode.parse()?;
            let change = ctx.gpu()?.set(mode)?;
            writeln!(out, "{}", change.message)?;
            match change.action {
                Some(UserAction::Logout) => writeln!(out, "LOGOUT_REQUIRED")?,
                Some(UserAction::Reboot) => writeln!(out, "REBOOT_REQUIRED")?,
                _ => {}
            }
        }

        Command::Charge { limit } => {
            let limit = charge::parse_limit(&limit)?;
            ctx.charge_limit().set(limit)?;
            writeln!(out, "Charge limit set to: {}%", limit)?;
        }

        Command::Turbo { enabled } => {
            let turbo = ctx.turbo()?;
            if enabled == 1 {
                turbo.enable()?;
                writeln!(out, "CPU Turbo enabled")?;
            } else {
                turbo.disable()?;
                writeln!(out, "CPU Turbo disabled")?;
            }
        }

        Command::PowerLimits => {
            let controller = ctx.power_limits()?;
            tracing::debug!(
                "{} CPU, interfaces {:?}",
                controller.vendor(),
                controller.interfaces()
            );
            let limits = controller.current();
            if json {
                print_json(out, &limits)?;
            } else {
                for line in limits.lines() {
                    writeln!(out, "{}", line)?;
                }
            }
        }

        Command::SetPowerLimits { pl1, pl2 } => {
            let pl1 = optional_watts("PL1", Some(&pl1))?;
            let pl2 = optional_watts("PL2", pl2.as_deref())?;
            ctx.power_limits()?.set(pl1, pl2)?;
            writeln!(out, "Power limits set successfully")?;
        }

        Command::LedStatus => {
            let state = ctx.lighting().status()?;
            if json {
                print_json(out, &state)?;
            } else {
                let [boot, awake, sleep, shutdown] = state.led_power.flags();
                writeln!(out, "led_mode:{}", state.led_mode)?;
                writeln!(out, "led_power:{} {} {} {}", boot, awake, sleep, shutdown)?;
            }
        }

        Command::LedBrightnessStatus => {
            let brightness = ctx.lighting().brightness()?;
            writeln!(out, "led_brightness:{}", brightness)?;
        }

        Command::LedPower {
            boot,
            awake,
            sleep,
            shutdown,
        } => {
            ctx.lighting().set_power(LedPower {
                boot: truthy(&boot),
                awake: truthy(&awake),
                sleep: truthy(&sleep),
                shutdown: truthy(&shutdown),
            })?;
            writeln!(out, "LED power updated")?;
        }

        Command::LedMode { mode } => {
            ctx.lighting().set_mode(mode)?;
            writeln!(out, "LED mode updated")?;
        }

        Command::LedBrightness { level } => {
            ctx.lighting().set_brightness(level)?;
            writeln!(out, "LED brightness updated")?;
        }

        Command::LedColor {
            red,
            green,
            blue,
            mode,
        } => {
            ctx.lighting().set_color(Rgb(red, green, blue), mode)?;
            writeln!(out, "LED color updated")?;
        }

        Command::LedSleep { action } => {
            let lighting = ctx.lighting();
            match action {
                SleepLighting::Off => lighting.sleep_lighting_off()?,
                SleepLighting::On => lighting.sleep_lighting_on()?,
                SleepLighting::Dim => lighting.sleep_mode_dim()?,
            }
            writeln!(out, "Sleep lighting updated")?;
        }

        Command::FanSpeeds => {
            let fans = hwmon::fan_speeds(ctx.sysfs());
            writeln!(out, "CPU Fan Speed: {}", fans.cpu_display())?;
            writeln!(out, "GPU Fan Speed: {}", fans.gpu_display())?;
        }

        Command::DetectDgpu => {
            writeln!(out, "{}", gpu::detect_dgpu(ctx.runner()))?;
        }

        Command::BatteryChargingStatus => {
            writeln!(out, "{}", battery::charging_status(ctx.sysfs()))?;
        }

        Command::PanelOverdrive { enabled } => {
            armoury::set_panel_overdrive(ctx.runner(), enabled == 1)?;
            let state = if enabled == 1 { "enabled" } else { "disabled" };
            writeln!(out, "Panel overdrive {}", state)?;
        }

        Command::RefreshRate { rate } => {
            ctx.display().set_rate(rate)?;
            writeln!(out, "Refresh rate set to: {}Hz", rate)?;
        }

        Command::GetSupportedRates => {
            let rates = ctx.display().supported_rates();
            if json {
                print_json(out, &rates)?;
            } else {
                let joined: Vec<String> = rates.iter().map(u32::to_string).collect();
                writeln!(out, "{}", joined.join(","))?;
            }
        }

        Command::AutoRefreshPanel => {
            let outcome = auto::run(ctx)?;
            writeln!(out, "Refresh rate set to: {}Hz", outcome.mode.rate())?;
            let state = if outcome.mode.overdrive() { "enabled" } else { "disabled" };
            writeln!(out, "Panel overdrive {}", state)?;
            writeln!(out, "{}", outcome.summary())?;
        }

        Command::OneShotCharge => {
            armoury::one_shot_charge(ctx.runner())?;
            writeln!(out, "One-shot charge to 100% toggled successfully")?;
        }

        Command::NvidiaPowerd { enabled } => {
            let service = &ctx.config().services.nvidia_powerd;
            services::set_nvidia_powerd(ctx.runner(), service, enabled == 1)?;
            let done = if enabled == 1 {
                "enabled and started"
            } else {
                "disabled and stopped"
            };
            writeln!(out, "nvidia-powerd service {}", done)?;
        }

        Command::TerminateAllProcesses => {
            let signalled = ctx.children().terminate_all();
            tracing::debug!("terminated {} child processes", signalled);
            writeln!(out, "Process cleanup completed")?;
        }

        Command::Completions { shell } => crate::cli::print_completions(shell)?,
    }
    Ok(())
}
