use crate::detect::battery;
use crate::error::{Error, Result};
use crate::sysfs::SysfsRoot;
use std::time::Duration;

const THRESHOLD_ATTR: &str = "charge_control_end_threshold";
const MIN_LIMIT: u8 = 50;
const MAX_LIMIT: u8 = 100;
/// Reported when no battery exposes a threshold.
pub const UNLIMITED: &str = "100";

const IO_TIMEOUT: Duration = Duration::from_secs(2);

pub fn parse_limit(raw: &str) -> Result<u8> {
    let limit: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Validation("Charge limit must be a number".into()))?;
    if !(MIN_LIMIT as i64..=MAX_LIMIT as i64).contains(&limit) {
        return Err(Error::Validation(format!(
            "Charge limit must be between {} and {}",
            MIN_LIMIT, MAX_LIMIT
        )));
    }
    Ok(limit as u8)
}

/// Battery charge threshold (`charge_control_end_threshold`).
pub struct ChargeLimit {
    sysfs: SysfsRoot,
    battery: Option<String>,
}

impl ChargeLimit {
    pub fn new(sysfs: &SysfsRoot, configured: Option<&str>) -> Self {
        let battery = battery::find_battery(sysfs, configured, THRESHOLD_ATTR);
        tracing::debug!("charge limit battery: {:?}", battery);
        Self {
            sysfs: sysfs.clone(),
            battery,
        }
    }

    fn attribute(&self) -> Option<String> {
        self.battery
            .as_deref()
            .map(|bat| battery::attribute_path(bat, THRESHOLD_ATTR))
    }

    /// Current threshold as text, or `100` when unreadable.
    pub fn current(&self) -> String {
        self.attribute()
            .and_then(|path| self.sysfs.read_optional(path).ok().flatten())
            .unwrap_or_else(|| UNLIMITED.to_string())
    }

    pub fn set(&self, limit: u8) -> Result<()> {
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(Error::Validation(format!(
                "Charge limit must be between {} and {}",
                MIN_LIMIT, MAX_LIMIT
            )));
        }
        let path = self
            .attribute()
            .filter(|path| self.sysfs.exists(path))
            .ok_or_else(|| Error::NotFound {
                what: "Battery charge limit file".into(),
                path: self.sysfs.path(
                    self.attribute()
                        .unwrap_or_else(|| battery::attribute_path("BAT*", THRESHOLD_ATTR)),
                ),
            })?;
        tracing::info!("charge limit -> {}%", limit);
        self.sysfs
            .write_bounded(path, &limit.to_string(), IO_TIMEOUT)
    }
}
