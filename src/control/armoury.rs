//! Firmware attributes exposed through `asusctl armoury`.

use crate::command::CommandRunner;
use crate::detect::battery::ChargingType;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

const LIST_TIMEOUT: Duration = Duration::from_secs(5);
const SET_TIMEOUT: Duration = Duration::from_secs(10);

pub const PANEL_OVERDRIVE_DEFAULT: &str = "0";
pub const CHARGE_MODE_DEFAULT: &str = "1";

static CURRENT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"current:\s*\[.*\((\d+)\).*\]").expect("valid regex"));

/// Selected value of `attribute` in an armoury listing.
///
/// The listing prints each attribute on its own line followed by a line like
/// `current: [0,(1),2]`, where the parenthesised entry is the active one.
pub fn parse_armoury_current(listing: &str, attribute: &str) -> Option<String> {
    let header = format!("{}:", attribute);
    let lines: Vec<&str> = listing.lines().collect();
    lines.windows(2).find_map(|pair| {
        if !pair[0].contains(&header) || !pair[1].contains("current:") {
            return None;
        }
        CURRENT_VALUE
            .captures(pair[1])
            .map(|c| c[1].to_string())
    })
}

/// Raw `asusctl armoury` output; `None` on any failure.
pub fn armoury_listing(runner: &dyn CommandRunner) -> Option<String> {
    match runner
        .run("asusctl", &["armoury"], LIST_TIMEOUT)
        .and_then(|out| out.into_success("asusctl"))
    {
        Ok(out) => Some(out.stdout),
        Err(e) => {
            tracing::debug!("asusctl armoury failed: {}", e);
            None
        }
    }
}

pub fn panel_overdrive(listing: Option<&str>) -> String {
    listing
        .and_then(|l| parse_armoury_current(l, "panel_overdrive"))
        .unwrap_or_else(|| PANEL_OVERDRIVE_DEFAULT.to_string())
}

/// Charge mode code; mode `1` (charging) is reported as `2` on a USB-PD charger.
pub fn charge_mode(listing: Option<&str>, charger: impl FnOnce() -> ChargingType) -> String {
    match listing.and_then(|l| parse_armoury_current(l, "charge_mode")) {
        Some(mode) if mode == "1" && charger() == ChargingType::UsbPd => "2".to_string(),
        Some(mode) => mode,
        None => CHARGE_MODE_DEFAULT.to_string(),
    }
}

/// asusctl versions disagree on where panel overdrive lives.
fn overdrive_commands(value: &str) -> Vec<Vec<String>> {
    [["armoury", "panel_overdrive"], ["platform", "panel_overdrive"]]
        .into_iter()
        .map(|prefix| {
            prefix
                .iter()
                .map(|s| s.to_string())
                .chain(std::iter::once(value.to_string()))
                .collect()
        })
        .collect()
}

pub fn set_panel_overdrive(runner: &dyn CommandRunner, enable: bool) -> Result<()> {
    let value = if enable { "1" } else { "0" };
    for argv in overdrive_commands(value) {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match runner
            .run("asusctl", &args, SET_TIMEOUT)
            .and_then(|out| out.into_success("asusctl"))
        {
            Ok(_) => {
                tracing::info!("panel overdrive -> {} via asusctl {}", value, args.join(" "));
                return Ok(());
            }
            Err(e) => tracing::debug!("asusctl {} failed: {}", args.join(" "), e),
        }
    }
    Err(Error::Unsupported(
        "Failed to set panel overdrive - feature may not be supported on this system".into(),
    ))
}

pub fn one_shot_charge(runner: &dyn CommandRunner) -> Result<()> {
    tracing::info!("toggling one-shot charge");
    runner
        .run("asusctl", &["--one-shot-chg"], SET_TIMEOUT)?
        .into_success("asusctl")
        .map_err(|e| Error::Other(format!("Failed to toggle one-shot charge: {}", e)))?;
    Ok(())
}
