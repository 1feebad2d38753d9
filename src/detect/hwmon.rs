//! Fan and temperature readings from `/sys/class/hwmon`.
//!
//! Chips are matched to CPU or GPU by name only. The result depends on the
//! kernel's enumeration order; boards that expose fans through a generic
//! platform chip (`asus`, `acpi_fan`) get "first fan is the CPU fan".

use crate::sysfs::SysfsRoot;

/// Rendered in place of any reading that cannot be obtained.
pub const UNAVAILABLE: &str = "N/A";

const HWMON_BASE: &str = "sys/class/hwmon";
const MAX_CHANNELS: u32 = 4;

const CPU_CHIP_NAMES: &[&str] = &["k10temp", "coretemp", "cpu"];
const GPU_CHIP_NAMES: &[&str] = &["nouveau", "amdgpu", "gpu"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipClass {
    Cpu,
    Gpu,
    Unknown,
}

/// Classify a hwmon chip by its `name`. CPU names win over GPU names.
pub fn classify_chip(name: &str) -> ChipClass {
    let name = name.to_lowercase();
    if CPU_CHIP_NAMES.iter().any(|n| name.contains(n)) {
        ChipClass::Cpu
    } else if GPU_CHIP_NAMES.iter().any(|n| name.contains(n)) {
        ChipClass::Gpu
    } else {
        ChipClass::Unknown
    }
}

/// One `fanN_input` reading and the name of the chip exposing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanReading {
    pub chip: String,
    pub rpm: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanSpeeds {
    pub cpu: Option<u32>,
    pub gpu: Option<u32>,
}

impl FanSpeeds {
    pub fn cpu_display(&self) -> String {
        render_rpm(self.cpu)
    }

    pub fn gpu_display(&self) -> String {
        render_rpm(self.gpu)
    }
}

fn render_rpm(rpm: Option<u32>) -> String {
    rpm.map(|r| format!("{} RPM", r))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

/// Bind readings to the CPU and GPU slots. A slot, once bound, keeps its
/// first value; unnamed chips fill the CPU slot, then the GPU slot.
pub fn assign_fans(readings: &[FanReading]) -> FanSpeeds {
    let mut speeds = FanSpeeds::default();
    for reading in readings {
        let slot = match classify_chip(&reading.chip) {
            ChipClass::Cpu => &mut speeds.cpu,
            ChipClass::Gpu => &mut speeds.gpu,
            ChipClass::Unknown if speeds.cpu.is_none() => &mut speeds.cpu,
            ChipClass::Unknown => &mut speeds.gpu,
        };
        slot.get_or_insert(reading.rpm);
    }
    speeds
}

fn chip_dirs(sysfs: &SysfsRoot) -> Vec<(String, String)> {
    let entries = match sysfs.list_dir(HWMON_BASE) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("no hwmon chips: {}", e);
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .map(|entry| {
            let dir = format!("{}/{}", HWMON_BASE, entry);
            let name = sysfs
                .read_optional(format!("{}/name", dir))
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_lowercase();
            (dir, name)
        })
        .collect()
}

/// Every readable `fan1_input..fan4_input` in enumeration order.
pub fn fan_readings(sysfs: &SysfsRoot) -> Vec<FanReading> {
    let mut readings = Vec::new();
    for (dir, name) in chip_dirs(sysfs) {
        for i in 1..=MAX_CHANNELS {
            if let Some(rpm) = sysfs.read_value::<u32>(format!("{}/fan{}_input", dir, i)) {
                readings.push(FanReading {
                    chip: name.clone(),
                    rpm,
                });
            }
        }
    }
    readings
}

pub fn fan_speeds(sysfs: &SysfsRoot) -> FanSpeeds {
    assign_fans(&fan_readings(sysfs))
}

/// CPU package temperature in °C.
///
/// Prefers the first `temp1..temp4_input` of a CPU-named chip, then falls back
/// to `temp1_input` of the first chip that has one.
pub fn cpu_temperature(sysfs: &SysfsRoot) -> Option<f64> {
    let mut fallback = None;
    for (dir, name) in chip_dirs(sysfs) {
        if classify_chip(&name) == ChipClass::Cpu {
            let reading = (1..=MAX_CHANNELS)
                .find_map(|i| sysfs.read_value::<i64>(format!("{}/temp{}_input", dir, i)));
            if let Some(milli) = reading {
                return Some(milli as f64 / 1000.0);
            }
        }
        if fallback.is_none() {
            fallback = sysfs.read_value::<i64>(format!("{}/temp1_input", dir));
        }
    }
    fallback.map(|milli| milli as f64 / 1000.0)
}

pub fn render_temperature(celsius: Option<f64>) -> String {
    celsius
        .map(|c| format!("{:.1}°C", c))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}
