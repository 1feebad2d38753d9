use crate::error::{Error, Result};
use crate::sysfs::SysfsRoot;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

const INTEL_NO_TURBO: &str = "sys/devices/system/cpu/intel_pstate/no_turbo";
const AMD_BOOST: &str = "sys/devices/system/cpu/cpufreq/boost";

const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// The turbo switch and its polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurboKnob {
    /// `1` disables turbo.
    IntelNoTurbo,
    /// `1` enables boost.
    AmdBoost,
}

impl TurboKnob {
    fn path(self) -> &'static str {
        match self {
            TurboKnob::IntelNoTurbo => INTEL_NO_TURBO,
            TurboKnob::AmdBoost => AMD_BOOST,
        }
    }

    fn literal(self, enabled: bool) -> &'static str {
        match (self, enabled) {
            (TurboKnob::IntelNoTurbo, true) | (TurboKnob::AmdBoost, false) => "0",
            (TurboKnob::IntelNoTurbo, false) | (TurboKnob::AmdBoost, true) => "1",
        }
    }

    fn vendor(self) -> &'static str {
        match self {
            TurboKnob::IntelNoTurbo => "Intel",
            TurboKnob::AmdBoost => "AMD",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurboStatus {
    pub available: bool,
    pub enabled: bool,
    pub path: PathBuf,
    pub vendor: &'static str,
}

pub struct TurboController {
    sysfs: SysfsRoot,
    knob: TurboKnob,
}

impl TurboController {
    /// `intel_pstate` wins when present; otherwise the generic cpufreq boost
    /// knob is assumed, whether or not it exists.
    pub fn detect(sysfs: &SysfsRoot) -> Self {
        let knob = if sysfs.exists(INTEL_NO_TURBO) {
            TurboKnob::IntelNoTurbo
        } else {
            TurboKnob::AmdBoost
        };
        Self {
            sysfs: sysfs.clone(),
            knob,
        }
    }

    pub fn knob(&self) -> TurboKnob {
        self.knob
    }

    pub fn available(&self) -> bool {
        self.sysfs.exists(self.knob.path())
    }

    pub fn enabled(&self) -> Result<bool> {
        self.ensure_available()?;
        let raw = self.sysfs.read_bounded(self.knob.path(), IO_TIMEOUT)?;
        Ok(raw == self.knob.literal(true))
    }

    pub fn enable(&self) -> Result<()> {
        self.write(true)
    }

    pub fn disable(&self) -> Result<()> {
        self.write(false)
    }

    pub fn status(&self) -> TurboStatus {
        let available = self.available();
        let enabled = available
            && self.enabled().unwrap_or_else(|e| {
                tracing::debug!("cannot read turbo state: {}", e);
                false
            });
        TurboStatus {
            available,
            enabled,
            path: self.sysfs.path(self.knob.path()),
            vendor: self.knob.vendor(),
        }
    }

    /// A timed-out write may still land; see [`SysfsRoot::write_bounded`].
    fn write(&self, enabled: bool) -> Result<()> {
        self.ensure_available()?;
        tracing::info!(
            "{} turbo via {}",
            if enabled { "enabling" } else { "disabling" },
            self.knob.path()
        );
        self.sysfs
            .write_bounded(self.knob.path(), self.knob.literal(enabled), IO_TIMEOUT)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available() {
            Ok(())
        } else {
            Err(Error::Unsupported("CPU turbo control is not available".into()))
        }
    }
}
