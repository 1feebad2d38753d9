//! Keyboard lighting through asusd's Aura interface.
//!
//! Every operation re-reads what it needs from the bus; nothing is cached
//! between calls.

use crate::bus::{self, Bus, BusTarget, BusValue};
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const AURA: BusTarget = BusTarget {
    service: "xyz.ljones.Asusd",
    path: "/xyz/ljones/aura/tuf",
    interface: "xyz.ljones.Aura",
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// The only power zone TUF keyboards expose.
const POWER_ZONE: u32 = 1;
/// Fields asusd keeps in mode data after the colours; passed through unchanged.
const MODE_DATA_RESERVED: (u32, u32) = (235, 0);
const SLEEP_DIM_COLOR: Rgb = Rgb(0, 0, 50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    fn to_bus(self) -> BusValue {
        BusValue::Struct(vec![
            BusValue::Byte(self.0),
            BusValue::Byte(self.1),
            BusValue::Byte(self.2),
        ])
    }

    fn from_json(value: &Value) -> Option<Self> {
        let parts = value.as_array()?;
        let byte = |i: usize| parts.get(i)?.as_u64().and_then(|v| u8::try_from(v).ok());
        Some(Rgb(byte(0)?, byte(1)?, byte(2)?))
    }
}

/// Lighting on/off per system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedPower {
    pub boot: bool,
    pub awake: bool,
    pub sleep: bool,
    pub shutdown: bool,
}

impl LedPower {
    pub const ALL_ON: LedPower = LedPower {
        boot: true,
        awake: true,
        sleep: true,
        shutdown: true,
    };

    /// `[[[zone, boot, awake, sleep, shutdown], ...]]`; the first zone is used.
    fn from_json(value: &Value) -> Result<Self> {
        let zone = value
            .get(0)
            .and_then(|zones| zones.get(0))
            .and_then(Value::as_array)
            .ok_or_else(|| Error::BadReply {
                member: "LedPower".into(),
                detail: format!("no power zone in {}", value),
            })?;
        let flag = |i: usize| {
            zone.get(i)
                .map(|v| bus::json_bool(v, "LedPower"))
                .unwrap_or_else(|| {
                    Err(Error::BadReply {
                        member: "LedPower".into(),
                        detail: format!("short power zone {}", value),
                    })
                })
        };
        Ok(LedPower {
            boot: flag(1)?,
            awake: flag(2)?,
            sleep: flag(3)?,
            shutdown: flag(4)?,
        })
    }

    fn to_bus(self, zone: u32) -> BusValue {
        BusValue::Struct(vec![BusValue::Array {
            element: "(ubbbb)".into(),
            items: vec![BusValue::Struct(vec![
                BusValue::U32(zone),
                BusValue::Bool(self.boot),
                BusValue::Bool(self.awake),
                BusValue::Bool(self.sleep),
                BusValue::Bool(self.shutdown),
            ])],
        }])
    }

    pub fn flags(&self) -> [u8; 4] {
        [self.boot, self.awake, self.sleep, self.shutdown].map(u8::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedModeData {
    pub mode: u32,
    pub speed: u32,
    pub primary: Rgb,
    pub secondary: Rgb,
    pub reserved: (u32, u32),
}

impl LedModeData {
    fn colour(mode: u32, primary: Rgb) -> Self {
        Self {
            mode,
            speed: 0,
            primary,
            secondary: Rgb(0, 0, 0),
            reserved: MODE_DATA_RESERVED,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        let fields = value.as_array()?;
        let number = |i: usize| fields.get(i)?.as_u64().and_then(|v| u32::try_from(v).ok());
        Some(Self {
            mode: number(0)?,
            speed: number(1)?,
            primary: Rgb::from_json(fields.get(2)?)?,
            secondary: Rgb::from_json(fields.get(3)?)?,
            reserved: (number(4)?, number(5)?),
        })
    }

    fn to_bus(self) -> BusValue {
        BusValue::Struct(vec![
            BusValue::U32(self.mode),
            BusValue::U32(self.speed),
            self.primary.to_bus(),
            self.secondary.to_bus(),
            BusValue::U32(self.reserved.0),
            BusValue::U32(self.reserved.1),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightingState {
    pub brightness: u32,
    pub led_mode: u32,
    pub led_power: LedPower,
    pub mode_data: Option<LedModeData>,
    pub supported_brightness: Vec<u32>,
    pub supported_modes: Vec<u32>,
}

pub struct LightingController {
    bus: Arc<dyn Bus>,
}

impl LightingController {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    fn get(&self, property: &str) -> Result<Value> {
        self.bus.get_property(&AURA, property, READ_TIMEOUT)
    }

    fn put(&self, property: &str, value: BusValue) -> Result<()> {
        self.bus.set_property(&AURA, property, &value, WRITE_TIMEOUT)
    }

    pub fn brightness(&self) -> Result<u32> {
        bus::json_u32(&self.get("Brightness")?, "Brightness")
    }

    pub fn led_mode(&self) -> Result<u32> {
        bus::json_u32(&self.get("LedMode")?, "LedMode")
    }

    pub fn led_power(&self) -> Result<LedPower> {
        LedPower::from_json(&self.get("LedPower")?)
    }

    pub fn supported_brightness(&self) -> Result<Vec<u32>> {
        bus::json_u32_list(&self.get("SupportedBrightness")?, "SupportedBrightness")
    }

    pub fn supported_modes(&self) -> Result<Vec<u32>> {
        bus::json_u32_list(&self.get("SupportedBasicModes")?, "SupportedBasicModes")
    }

    pub fn status(&self) -> Result<LightingState> {
        let mode_data = match self.get("LedModeData") {
            Ok(value) => LedModeData::from_json(&value),
            Err(e) => {
                tracing::debug!("LedModeData unavailable: {}", e);
                None
            }
        };
        Ok(LightingState {
            brightness: self.brightness()?,
            led_mode: self.led_mode()?,
            led_power: self.led_power()?,
            mode_data,
            supported_brightness: self.supported_brightness()?,
            supported_modes: self.supported_modes()?,
        })
    }

    pub fn set_brightness(&self, level: u32) -> Result<()> {
        let supported = self.supported_brightness()?;
        check_member("brightness level", level, &supported)?;
        tracing::info!("keyboard brightness -> {}", level);
        self.put("Brightness", BusValue::U32(level))
    }

    pub fn set_mode(&self, mode: u32) -> Result<()> {
        let supported = self.supported_modes()?;
        check_member("mode", mode, &supported)?;
        tracing::info!("keyboard LED mode -> {}", mode);
        self.put("LedMode", BusValue::U32(mode))
    }

    pub fn set_power(&self, power: LedPower) -> Result<()> {
        tracing::info!("keyboard LED power -> {:?}", power.flags());
        self.put("LedPower", power.to_bus(POWER_ZONE))
    }

    /// Mode data, then mode. The two writes are not atomic: if the second
    /// fails the colour has already changed.
    pub fn set_color(&self, color: Rgb, mode: u32) -> Result<()> {
        let supported = self.supported_modes()?;
        check_member("mode", mode, &supported)?;
        tracing::info!("keyboard colour -> {:?} in mode {}", color, mode);
        self.put("LedModeData", LedModeData::colour(mode, color).to_bus())?;
        self.put("LedMode", BusValue::U32(mode))
    }

    pub fn sleep_lighting_off(&self) -> Result<()> {
        self.set_power(LedPower {
            sleep: false,
            ..LedPower::ALL_ON
        })
    }

    pub fn sleep_lighting_on(&self) -> Result<()> {
        self.set_power(LedPower::ALL_ON)
    }

    /// Lowest brightness, lit during sleep, dim blue. Each step runs even if
    /// an earlier one failed; nothing is rolled back.
    pub fn sleep_mode_dim(&self) -> Result<()> {
        let steps: [(&str, Result<()>); 3] = [
            ("brightness", self.set_brightness(0)),
            ("sleep power", self.sleep_lighting_on()),
            ("colour", self.set_color(SLEEP_DIM_COLOR, 0)),
        ];
        let mut failed = Vec::new();
        for (step, result) in steps {
            if let Err(e) = result {
                tracing::warn!("sleep dim: {} step failed: {}", step, e);
                failed.push(step);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "Sleep lighting partially applied; failed: {}",
                failed.join(", ")
            )))
        }
    }
}

fn check_member(what: &str, value: u32, supported: &[u32]) -> Result<()> {
    if supported.contains(&value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid {} {}. Supported: {:?}",
            what, value, supported
        )))
    }
}
