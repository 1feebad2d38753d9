use crate::sysfs::SysfsRoot;

const POWER_SUPPLY_BASE: &str = "sys/class/power_supply";

/// Batteries whose `status` feeds the charging status code.
const STATUS_BATTERIES: &[&str] = &["BAT0", "BAT1"];

/// Capacity at or above which "Not charging" is reported as full.
const NEARLY_FULL_PERCENT: u32 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingType {
    UsbPd,
    Usb,
    Ac,
}

/// Classify one power supply. Returns `None` for supplies that are offline
/// or say nothing about the charger.
pub fn classify_supply(online: &str, supply_type: &str, usb_type: Option<&str>) -> Option<ChargingType> {
    if online.trim() != "1" {
        return None;
    }
    match supply_type.trim() {
        "USB" => match usb_type {
            Some(t) if t.contains("PD") || t.contains('C') => Some(ChargingType::UsbPd),
            _ => Some(ChargingType::Usb),
        },
        "Mains" | "ADP1" => Some(ChargingType::Ac),
        _ => None,
    }
}

/// First online supply that classifies wins; AC when nothing does.
pub fn charging_type(sysfs: &SysfsRoot) -> ChargingType {
    let supplies = match sysfs.list_dir(POWER_SUPPLY_BASE) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("no power supplies: {}", e);
            return ChargingType::Ac;
        }
    };
    for supply in supplies {
        let base = format!("{}/{}", POWER_SUPPLY_BASE, supply);
        let Some(online) = sysfs.read_optional(format!("{}/online", base)).ok().flatten() else {
            continue;
        };
        let Some(supply_type) = sysfs.read_optional(format!("{}/type", base)).ok().flatten() else {
            continue;
        };
        let usb_type = sysfs.read_optional(format!("{}/usb_type", base)).ok().flatten();
        if let Some(kind) = classify_supply(&online, &supply_type, usb_type.as_deref()) {
            tracing::debug!("charging type {:?} from {}", kind, supply);
            return kind;
        }
    }
    ChargingType::Ac
}

/// Numeric codes consumed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryChargingStatus {
    Discharging = 0,
    AcCharging = 1,
    UsbPdCharging = 2,
    Full = 3,
    NotCharging = 4,
}

impl BatteryChargingStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_discharging(self) -> bool {
        self == BatteryChargingStatus::Discharging
    }
}

impl std::fmt::Display for BatteryChargingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Map a battery `status` (plus capacity and the charger kind) to a code.
/// Unrecognised states count as discharging.
pub fn classify_charging(
    status: &str,
    capacity: Option<u32>,
    charger: impl FnOnce() -> ChargingType,
) -> BatteryChargingStatus {
    match status.trim().to_uppercase().replace(' ', "_").as_str() {
        "CHARGING" => match charger() {
            ChargingType::UsbPd => BatteryChargingStatus::UsbPdCharging,
            _ => BatteryChargingStatus::AcCharging,
        },
        "FULL" => BatteryChargingStatus::Full,
        "NOT_CHARGING" => match capacity {
            Some(c) if c >= NEARLY_FULL_PERCENT => BatteryChargingStatus::Full,
            _ => BatteryChargingStatus::NotCharging,
        },
        _ => BatteryChargingStatus::Discharging,
    }
}

pub fn charging_status(sysfs: &SysfsRoot) -> BatteryChargingStatus {
    for bat in STATUS_BATTERIES {
        let base = format!("{}/{}", POWER_SUPPLY_BASE, bat);
        if let Some(status) = sysfs.read_optional(format!("{}/status", base)).ok().flatten() {
            let capacity = sysfs.read_value(format!("{}/capacity", base));
            return classify_charging(&status, capacity, || charging_type(sysfs));
        }
    }
    tracing::debug!("no battery status found");
    BatteryChargingStatus::Discharging
}

/// Name of the battery that exposes `attribute`, honouring a configured name.
pub fn find_battery(sysfs: &SysfsRoot, configured: Option<&str>, attribute: &str) -> Option<String> {
    if let Some(name) = configured {
        return Some(name.to_string());
    }
    sysfs
        .list_dir(POWER_SUPPLY_BASE)
        .ok()?
        .into_iter()
        .filter(|name| name.starts_with("BAT"))
        .find(|name| sysfs.exists(format!("{}/{}/{}", POWER_SUPPLY_BASE, name, attribute)))
}

pub fn attribute_path(battery: &str, attribute: &str) -> String {
    format!("{}/{}/{}", POWER_SUPPLY_BASE, battery, attribute)
}
