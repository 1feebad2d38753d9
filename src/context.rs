//! Per-invocation handles to every control surface.

use crate::bus::{Bus, BusctlBus};
use crate::command::{ChildRegistry, CommandRunner, SystemRunner};
use crate::config::TufConfig;
use crate::control::charge::ChargeLimit;
use crate::control::display::DisplayController;
use crate::control::gpu_mode::GpuController;
use crate::control::lighting::LightingController;
use crate::control::power_limits::PowerLimitsController;
use crate::control::power_profile::PowerProfileController;
use crate::control::turbo::TurboController;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::sysfs::SysfsRoot;
use std::sync::{Arc, OnceLock};

/// A surface handle established at most once. A failed connection is kept,
/// so later callers see the same failure instead of retrying.
pub struct SurfaceCell<T> {
    name: &'static str,
    cell: OnceLock<std::result::Result<T, String>>,
}

impl<T> SurfaceCell<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_connect<F>(&self, connect: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        let name = self.name;
        self.cell
            .get_or_init(|| {
                connect().map_err(|e| {
                    tracing::debug!("{} unavailable: {}", name, e);
                    e.to_string()
                })
            })
            .as_ref()
            .map_err(|reason| Error::SurfaceUnavailable {
                surface: name,
                reason: reason.clone(),
            })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}

pub struct Context {
    config: TufConfig,
    sysfs: SysfsRoot,
    runner: Arc<dyn CommandRunner>,
    bus: Arc<dyn Bus>,
    children: ChildRegistry,
    power_profile: SurfaceCell<PowerProfileController>,
    gpu: SurfaceCell<GpuController>,
    turbo: SurfaceCell<TurboController>,
    power_limits: SurfaceCell<PowerLimitsController>,
}

impl Context {
    /// Real processes and the system bus, rooted where the config says.
    pub fn system(config: TufConfig, deadline: Deadline, children: ChildRegistry) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::new(deadline, children.clone()));
        let bus: Arc<dyn Bus> = Arc::new(BusctlBus::new(runner.clone()));
        let sysfs = SysfsRoot::new(config.paths.root.clone());
        Self::new(config, sysfs, runner, bus, children)
    }

    pub fn new(
        config: TufConfig,
        sysfs: SysfsRoot,
        runner: Arc<dyn CommandRunner>,
        bus: Arc<dyn Bus>,
        children: ChildRegistry,
    ) -> Self {
        Self {
            config,
            sysfs,
            runner,
            bus,
            children,
            power_profile: SurfaceCell::new("power profile service"),
            gpu: SurfaceCell::new("supergfxd"),
            turbo: SurfaceCell::new("CPU turbo"),
            power_limits: SurfaceCell::new("CPU power limits"),
        }
    }

    pub fn config(&self) -> &TufConfig {
        &self.config
    }

    pub fn sysfs(&self) -> &SysfsRoot {
        &self.sysfs
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn children(&self) -> &ChildRegistry {
        &self.children
    }

    pub fn power_profile(&self) -> Result<&PowerProfileController> {
        self.power_profile
            .get_or_connect(|| PowerProfileController::connect(self.bus.clone()))
    }

    pub fn gpu(&self) -> Result<&GpuController> {
        self.gpu
            .get_or_connect(|| GpuController::connect(self.bus.clone()))
    }

    pub fn turbo(&self) -> Result<&TurboController> {
        self.turbo
            .get_or_connect(|| Ok(TurboController::detect(&self.sysfs)))
    }

    pub fn power_limits(&self) -> Result<&PowerLimitsController> {
        self.power_limits.get_or_connect(|| {
            Ok(PowerLimitsController::detect(
                &self.sysfs,
                self.runner.clone(),
                self.bus.clone(),
                &self.config.services.thermald,
            ))
        })
    }

    pub fn lighting(&self) -> LightingController {
        LightingController::new(self.bus.clone())
    }

    pub fn charge_limit(&self) -> ChargeLimit {
        ChargeLimit::new(&self.sysfs, self.config.battery.name.as_deref())
    }

    pub fn display(&self) -> DisplayController {
        DisplayController::new(self.runner.clone(), self.config.display.clone())
    }
}
