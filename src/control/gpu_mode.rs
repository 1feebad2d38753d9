use crate::bus::{self, Bus, BusTarget, BusValue};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

pub const SUPERGFXCTL: BusTarget = BusTarget {
    service: "org.supergfxctl.Daemon",
    path: "/org/supergfxctl/Gfx",
    interface: "org.supergfxctl.Daemon",
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(3);
const SWITCH_TIMEOUT: Duration = Duration::from_secs(10);

/// supergfxctl modes, in the daemon's index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMode {
    Hybrid,
    Integrated,
    Vfio,
    AsusMuxDiscreet,
    Egpu,
    AsusMuxDgpu,
}

impl GpuMode {
    pub const ALL: [GpuMode; 6] = [
        GpuMode::Hybrid,
        GpuMode::Integrated,
        GpuMode::Vfio,
        GpuMode::AsusMuxDiscreet,
        GpuMode::Egpu,
        GpuMode::AsusMuxDgpu,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GpuMode::Hybrid => "hybrid",
            GpuMode::Integrated => "integrated",
            GpuMode::Vfio => "vfio",
            GpuMode::AsusMuxDiscreet => "asusmuxdiscreet",
            GpuMode::Egpu => "egpu",
            GpuMode::AsusMuxDgpu => "asusmuxdgpu",
        }
    }

    pub fn index(self) -> u32 {
        GpuMode::ALL.iter().position(|m| *m == self).unwrap_or_default() as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        GpuMode::ALL.get(index as usize).copied()
    }
}

impl std::fmt::Display for GpuMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for GpuMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_lowercase();
        GpuMode::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = GpuMode::ALL.iter().map(|m| m.name()).collect();
                Error::Validation(format!(
                    "Invalid mode: {}. Available modes: {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// What the user must do after a mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Logout,
    Reboot,
    Nothing,
}

impl UserAction {
    fn from_index(index: u32) -> Option<Self> {
        [UserAction::Logout, UserAction::Reboot, UserAction::Nothing]
            .get(index as usize)
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub message: String,
    /// `None` when the requested mode was already active.
    pub action: Option<UserAction>,
}

fn wrap(operation: &'static str) -> impl FnOnce(Error) -> Error {
    move |source| Error::GpuOperation {
        operation,
        source: Box::new(source),
    }
}

pub struct GpuController {
    bus: Arc<dyn Bus>,
}

impl GpuController {
    /// Fails unless supergfxd answers; there is no fallback guess.
    pub fn connect(bus: Arc<dyn Bus>) -> Result<Self> {
        bus.ping(&SUPERGFXCTL, CONNECT_TIMEOUT)?;
        Ok(Self { bus })
    }

    pub fn mode(&self) -> Result<GpuMode> {
        let read = || -> Result<GpuMode> {
            let reply = self.bus.call(&SUPERGFXCTL, "Mode", &[], READ_TIMEOUT)?;
            let index = bus::json_u32(bus::first_return(&reply, "Mode")?, "Mode")?;
            GpuMode::from_index(index).ok_or_else(|| {
                Error::Other(format!("Unrecognized graphics mode with index {}", index))
            })
        };
        read().map_err(wrap("getting"))
    }

    pub fn set(&self, mode: GpuMode) -> Result<ModeChange> {
        let current = self.mode()?;
        if current == mode {
            return Ok(ModeChange {
                message: format!("Already in {} mode", mode),
                action: None,
            });
        }

        tracing::info!("switching GPU mode {} -> {}", current, mode);
        let switch = || -> Result<UserAction> {
            let reply = self.bus.call(
                &SUPERGFXCTL,
                "SetMode",
                &[BusValue::U32(mode.index())],
                SWITCH_TIMEOUT,
            )?;
            let index = bus::json_u32(bus::first_return(&reply, "SetMode")?, "SetMode")?;
            UserAction::from_index(index)
                .ok_or_else(|| Error::Other(format!("Unknown action index: {}", index)))
        };
        let action = switch().map_err(wrap("setting"))?;

        let mut message = match action {
            UserAction::Nothing => format!("Graphics changed to {}. No action required.", mode),
            UserAction::Logout => format!(
                "Graphics changed to {}. You need to log out for changes to take effect.",
                mode
            ),
            UserAction::Reboot => format!(
                "Graphics changed to {}. You need to reboot for changes to take effect.",
                mode
            ),
        };
        if mode == GpuMode::Integrated {
            message.push_str(" You must switch to Integrated mode before switching to Compute or VFIO.");
        }
        Ok(ModeChange {
            message,
            action: Some(action),
        })
    }
}
