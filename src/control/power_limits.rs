//! CPU package power limits (PL1 sustained, PL2 boost).
//!
//! Three backends are tried in order for reads: Intel RAPL through powercap,
//! thermald over the bus, and `ryzenadj`. Only RAPL and `ryzenadj` can write;
//! both need root and go through `pkexec`.

use crate::bus::{self, Bus, BusTarget};
use crate::command::CommandRunner;
use crate::control::services::{self, ServiceState};
use crate::detect::cpu::CpuVendor;
use crate::error::{Error, Result};
use crate::sysfs::SysfsRoot;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const RAPL_BASE: &str = "sys/class/powercap/intel-rapl";
const RAPL_PACKAGE: &str = "sys/class/powercap/intel-rapl:0";
const AMD_HSMP: &str = "sys/devices/platform/amd_hsmp";

const THERMALD: BusTarget = BusTarget {
    service: "org.freedesktop.thermald",
    path: "/org/freedesktop/thermald",
    interface: "org.freedesktop.thermald",
};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const ELEVATED_TIMEOUT: Duration = Duration::from_secs(20);

const DEFAULT_MIN_W: f64 = 10.0;
const DEFAULT_MAX_W: f64 = 95.0;
const FLOOR_W: f64 = 5.0;
const MAX_CEILING_W: f64 = 120.0;
const MAX_FLOOR_W: f64 = 15.0;
/// Boost limit synthesised from PL1 when a backend only reports PL1.
const PL2_RATIO: f64 = 1.25;

static STAPM_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"STAPM LIMIT.*?(\d+\.\d+)").expect("valid regex"));
static FAST_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PPT LIMIT FAST.*?(\d+\.\d+)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitsInterface {
    IntelRapl,
    IntelRaplPackage,
    AmdHsmp,
    Thermald,
    Ryzenadj,
}

pub fn detect_interfaces(
    sysfs: &SysfsRoot,
    runner: &dyn CommandRunner,
    thermald_service: &str,
) -> Vec<LimitsInterface> {
    let mut found = Vec::new();
    if sysfs.exists(RAPL_BASE) {
        found.push(LimitsInterface::IntelRapl);
    }
    if sysfs.exists(RAPL_PACKAGE) {
        found.push(LimitsInterface::IntelRaplPackage);
    }
    if sysfs.exists(AMD_HSMP) {
        found.push(LimitsInterface::AmdHsmp);
    }
    if services::service_state(runner, thermald_service) == ServiceState::Active {
        found.push(LimitsInterface::Thermald);
    }
    if runner.exists("ryzenadj") {
        found.push(LimitsInterface::Ryzenadj);
    }
    tracing::debug!("power limit interfaces: {:?}", found);
    found
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerRange {
    pub min: f64,
    pub max: f64,
}

impl Default for PowerRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_W,
            max: DEFAULT_MAX_W,
        }
    }
}

impl PowerRange {
    fn clamped(self) -> Self {
        let min = self.min.max(FLOOR_W);
        let max = self.max.min(MAX_CEILING_W).max(MAX_FLOOR_W);
        Self {
            min: min.min(max),
            max,
        }
    }

    fn check(&self, label: &str, watts: f64) -> Result<()> {
        if watts.is_finite() && watts >= self.min && watts <= self.max {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "Invalid {} value. Must be between {}W and {}W.",
                label,
                round1(self.min),
                round1(self.max)
            )))
        }
    }
}

/// Limits in watts as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerLimits {
    pub pl1: f64,
    pub pl2: f64,
    pub min: f64,
    pub max: f64,
}

impl PowerLimits {
    pub fn lines(&self) -> [String; 4] {
        [self.pl1, self.pl2, self.min, self.max].map(|w| format!("{:.1}", w))
    }
}

fn round1(watts: f64) -> f64 {
    (watts * 10.0).round() / 10.0
}

/// PL1 and (optionally) PL2 in watts, as read from one backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub pl1: f64,
    pub pl2: Option<f64>,
}

pub trait LimitsBackend {
    fn name(&self) -> &'static str;

    fn read(&self) -> Result<Reading>;

    /// Range refinement, from positive surface values only.
    fn range(&self) -> Option<PowerRange> {
        None
    }

    fn writable(&self) -> bool {
        false
    }

    fn write(&self, _pl1: Option<f64>, _pl2: Option<f64>) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} cannot set power limits",
            self.name()
        )))
    }
}

pub struct RaplBackend {
    sysfs: SysfsRoot,
    runner: Arc<dyn CommandRunner>,
}

impl RaplBackend {
    pub fn new(sysfs: SysfsRoot, runner: Arc<dyn CommandRunner>) -> Self {
        Self { sysfs, runner }
    }

    /// First `intel-rapl:N` zone, which is the CPU package.
    fn package(&self) -> Result<String> {
        self.sysfs
            .list_dir(RAPL_BASE)?
            .into_iter()
            .filter(|entry| entry.starts_with("intel-rapl:"))
            .map(|entry| format!("{}/{}", RAPL_BASE, entry))
            .find(|dir| self.sysfs.is_dir(dir))
            .ok_or_else(|| Error::NotFound {
                what: "Intel RAPL package directory".into(),
                path: self.sysfs.path(RAPL_BASE),
            })
    }

    fn tee(&self, attribute: &str, watts: f64) -> Result<()> {
        let path = self.sysfs.path(attribute);
        let path = path.to_string_lossy();
        let microwatts = format!("{}", (watts * 1_000_000.0).round() as u64);
        tracing::info!("writing {} uW to {}", microwatts, path);
        self.runner
            .run_input("pkexec", &["tee", &path], Some(&microwatts), ELEVATED_TIMEOUT)?
            .into_success("pkexec")?;
        Ok(())
    }
}

impl LimitsBackend for RaplBackend {
    fn name(&self) -> &'static str {
        "intel-rapl"
    }

    fn read(&self) -> Result<Reading> {
        let package = self.package()?;
        let pl1: u64 = self
            .sysfs
            .read_parse(format!("{}/constraint_0_power_limit_uw", package))?;
        let pl2 = self
            .sysfs
            .read_value::<u64>(format!("{}/constraint_1_power_limit_uw", package));
        Ok(Reading {
            pl1: pl1 as f64 / 1_000_000.0,
            pl2: pl2.map(|uw| uw as f64 / 1_000_000.0),
        })
    }

    fn range(&self) -> Option<PowerRange> {
        let package = self.package().ok()?;
        let max_uw = self
            .sysfs
            .read_value::<u64>(format!("{}/constraint_0_max_power_uw", package))
            .filter(|uw| *uw > 0)?;
        let max = max_uw as f64 / 1_000_000.0;
        Some(PowerRange {
            min: FLOOR_W.max(max * 0.2),
            max,
        })
    }

    fn writable(&self) -> bool {
        true
    }

    fn write(&self, pl1: Option<f64>, pl2: Option<f64>) -> Result<()> {
        let package = self.package()?;
        if let Some(watts) = pl1 {
            self.tee(&format!("{}/constraint_0_power_limit_uw", package), watts)?;
        }
        if let Some(watts) = pl2 {
            self.tee(&format!("{}/constraint_1_power_limit_uw", package), watts)?;
        }
        Ok(())
    }
}

/// Read-only: thermald reports TDP values but has no setter.
pub struct ThermaldBackend {
    bus: Arc<dyn Bus>,
}

impl ThermaldBackend {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }
}

impl LimitsBackend for ThermaldBackend {
    fn name(&self) -> &'static str {
        "thermald"
    }

    fn read(&self) -> Result<Reading> {
        let reply = self
            .bus
            .call(&THERMALD, "GetTdpValues", &[], QUERY_TIMEOUT)?;
        let values = match bus::first_return(&reply, "GetTdpValues")? {
            Value::Array(inner) => inner.clone(),
            _ => bus::json_array(&reply, "GetTdpValues")?.clone(),
        };
        let watts: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
        match watts.as_slice() {
            [pl1, pl2, ..] => Ok(Reading {
                pl1: *pl1,
                pl2: Some(*pl2),
            }),
            _ => Err(Error::BadReply {
                member: "GetTdpValues".into(),
                detail: format!("expected two TDP values, got {}", reply),
            }),
        }
    }
}

/// Parse `ryzenadj --info` into (STAPM, PPT fast) watts.
pub fn parse_ryzenadj_info(info: &str) -> (Option<f64>, Option<f64>) {
    let capture = |re: &Regex| {
        re.captures(info)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };
    (capture(&STAPM_LIMIT), capture(&FAST_LIMIT))
}

pub struct RyzenadjBackend {
    runner: Arc<dyn CommandRunner>,
}

impl RyzenadjBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn info(&self) -> Result<(Option<f64>, Option<f64>)> {
        let out = self
            .runner
            .run("ryzenadj", &["--info"], QUERY_TIMEOUT)?
            .into_success("ryzenadj")?;
        Ok(parse_ryzenadj_info(&out.stdout))
    }
}

impl LimitsBackend for RyzenadjBackend {
    fn name(&self) -> &'static str {
        "ryzenadj"
    }

    fn read(&self) -> Result<Reading> {
        match self.info()? {
            (Some(pl1), pl2) => Ok(Reading { pl1, pl2 }),
            (None, _) => Err(Error::BadReply {
                member: "ryzenadj --info".into(),
                detail: "no STAPM LIMIT in output".into(),
            }),
        }
    }

    fn range(&self) -> Option<PowerRange> {
        let stapm = self.info().ok()?.0.filter(|w| *w > 0.0)?;
        Some(PowerRange {
            min: FLOOR_W.max(stapm * 0.5),
            max: stapm * 1.5,
        })
    }

    fn writable(&self) -> bool {
        true
    }

    /// ryzenadj takes milliwatts; both limits go in one elevated call.
    fn write(&self, pl1: Option<f64>, pl2: Option<f64>) -> Result<()> {
        let mut args = vec!["ryzenadj".to_string()];
        if let Some(watts) = pl1 {
            args.push(format!("--stapm-limit={}", (watts * 1000.0).round() as u64));
        }
        if let Some(watts) = pl2 {
            args.push(format!("--fast-limit={}", (watts * 1000.0).round() as u64));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        tracing::info!("pkexec {}", args.join(" "));
        self.runner
            .run("pkexec", &args, ELEVATED_TIMEOUT)?
            .into_success("pkexec")?;
        Ok(())
    }
}

pub struct PowerLimitsController {
    vendor: CpuVendor,
    interfaces: Vec<LimitsInterface>,
    range: PowerRange,
    backends: Vec<Box<dyn LimitsBackend>>,
}

impl PowerLimitsController {
    pub fn detect(
        sysfs: &SysfsRoot,
        runner: Arc<dyn CommandRunner>,
        bus: Arc<dyn Bus>,
        thermald_service: &str,
    ) -> Self {
        let vendor = CpuVendor::detect(sysfs);
        let interfaces = detect_interfaces(sysfs, runner.as_ref(), thermald_service);

        let mut backends: Vec<Box<dyn LimitsBackend>> = Vec::new();
        if interfaces.contains(&LimitsInterface::IntelRapl) {
            backends.push(Box::new(RaplBackend::new(sysfs.clone(), runner.clone())));
        }
        if interfaces.contains(&LimitsInterface::Thermald) {
            backends.push(Box::new(ThermaldBackend::new(bus)));
        }
        if interfaces.contains(&LimitsInterface::Ryzenadj) {
            backends.push(Box::new(RyzenadjBackend::new(runner)));
        }

        let mut controller = Self::with_backends(vendor, backends);
        controller.interfaces = interfaces;
        controller
    }

    pub fn with_backends(vendor: CpuVendor, backends: Vec<Box<dyn LimitsBackend>>) -> Self {
        let range = backends
            .iter()
            .find_map(|b| b.range())
            .unwrap_or_default()
            .clamped();
        tracing::debug!("{} CPU, power limit range {:?}", vendor, range);
        Self {
            vendor,
            interfaces: Vec::new(),
            range,
            backends,
        }
    }

    pub fn vendor(&self) -> CpuVendor {
        self.vendor
    }

    pub fn interfaces(&self) -> &[LimitsInterface] {
        &self.interfaces
    }

    pub fn range(&self) -> PowerRange {
        self.range
    }

    /// First backend that reads wins; if none does, the midpoint of the range
    /// stands in for PL1.
    pub fn current(&self) -> PowerLimits {
        let reading = self.backends.iter().find_map(|b| match b.read() {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::debug!("{} read failed: {}", b.name(), e);
                None
            }
        });
        let pl1 = reading
            .map(|r| r.pl1)
            .unwrap_or((self.range.min + self.range.max) / 2.0);
        let pl2 = reading.and_then(|r| r.pl2).unwrap_or(pl1 * PL2_RATIO);
        PowerLimits {
            pl1: round1(pl1),
            pl2: round1(pl2),
            min: round1(self.range.min),
            max: round1(self.range.max),
        }
    }

    /// Validate both values before touching anything. Neither given is a no-op.
    pub fn set(&self, pl1: Option<f64>, pl2: Option<f64>) -> Result<()> {
        if let Some(watts) = pl1 {
            self.range.check("PL1", watts)?;
        }
        if let Some(watts) = pl2 {
            self.range.check("PL2", watts)?;
        }
        if pl1.is_none() && pl2.is_none() {
            return Ok(());
        }

        let backend = self.backends.iter().find(|b| b.writable()).ok_or_else(|| {
            Error::Unsupported("No supported interface available to set power limits.".into())
        })?;
        tracing::debug!("setting power limits via {}", backend.name());
        backend.write(pl1, pl2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::test_utils::{FakeBus, FakeRunner};
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;

    struct StubBackend {
        reading: Option<Reading>,
        range: Option<PowerRange>,
        writes: RefCell<Vec<(Option<f64>, Option<f64>)>>,
    }

    impl StubBackend {
        fn new(reading: Option<Reading>) -> Self {
            Self {
                reading,
                range: None,
                writes: RefCell::new(Vec::new()),
            }
        }
    }

    impl LimitsBackend for &StubBackend {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn read(&self) -> Result<Reading> {
            self.reading
                .ok_or_else(|| Error::Unsupported("stub has no reading".into()))
        }

        fn range(&self) -> Option<PowerRange> {
            self.range
        }

        fn writable(&self) -> bool {
            true
        }

        fn write(&self, pl1: Option<f64>, pl2: Option<f64>) -> Result<()> {
            self.writes.borrow_mut().push((pl1, pl2));
            Ok(())
        }
    }

    fn leak(stub: StubBackend) -> &'static StubBackend {
        Box::leak(Box::new(stub))
    }

    #[test]
    fn test_defaults_when_nothing_reads() {
        let controller = PowerLimitsController::with_backends(CpuVendor::Unknown, Vec::new());
        let limits = controller.current();
        assert_eq!(limits.pl1, 52.5);
        assert_eq!(limits.pl2, 65.6);
        assert_eq!(limits.lines(), ["52.5", "65.6", "10.0", "95.0"]);
    }

    #[test]
    fn test_first_successful_backend_wins() {
        let failing = leak(StubBackend::new(None));
        let working = leak(StubBackend::new(Some(Reading {
            pl1: 45.0,
            pl2: None,
        })));
        let controller = PowerLimitsController::with_backends(
            CpuVendor::Intel,
            vec![Box::new(failing), Box::new(working)],
        );
        let limits = controller.current();
        assert_eq!(limits.pl1, 45.0);
        assert_eq!(limits.pl2, 56.3);
    }

    #[test]
    fn test_out_of_range_rejected_without_write() {
        let stub = leak(StubBackend::new(None));
        let controller = PowerLimitsController::with_backends(CpuVendor::Intel, vec![Box::new(stub)]);

        let err = controller.set(Some(200.0), None).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Invalid PL1 value. Must be between 10W and 95W."
        );
        let err = controller.set(Some(40.0), Some(3.0)).unwrap_err();
        assert!(err.to_string().starts_with("Invalid PL2 value"));
        assert!(stub.writes.borrow().is_empty());
    }

    #[test]
    fn test_set_passes_values_and_noop_when_empty() {
        let stub = leak(StubBackend::new(None));
        let controller = PowerLimitsController::with_backends(CpuVendor::Amd, vec![Box::new(stub)]);

        controller.set(None, None).unwrap();
        assert!(stub.writes.borrow().is_empty());

        controller.set(Some(35.0), None).unwrap();
        assert_eq!(*stub.writes.borrow(), vec![(Some(35.0), None)]);
    }

    #[test]
    fn test_range_is_clamped() {
        let mut stub = StubBackend::new(None);
        stub.range = Some(PowerRange { min: 2.0, max: 250.0 });
        let controller =
            PowerLimitsController::with_backends(CpuVendor::Amd, vec![Box::new(leak(stub))]);
        assert_eq!(controller.range(), PowerRange { min: 5.0, max: 120.0 });

        let mut stub = StubBackend::new(None);
        stub.range = Some(PowerRange { min: 5.0, max: 8.0 });
        let controller =
            PowerLimitsController::with_backends(CpuVendor::Amd, vec![Box::new(leak(stub))]);
        assert_eq!(controller.range().max, 15.0);
    }

    #[test]
    fn test_clamped_range_never_inverts() {
        // ryzenadj on a 300 W STAPM part: min 150 W, max 450 W.
        let range = PowerRange { min: 150.0, max: 450.0 }.clamped();
        assert_eq!(range, PowerRange { min: 120.0, max: 120.0 });
        assert!(range.check("PL1", 120.0).is_ok());
        assert!(range.check("PL1", 100.0).is_err());

        let range = PowerRange { min: 5.0f64.max(700.0 * 0.2), max: 700.0 }.clamped();
        assert!(range.min <= range.max);
    }

    #[test]
    fn test_no_writable_backend() {
        let bus = Arc::new(FakeBus::default());
        let controller = PowerLimitsController::with_backends(
            CpuVendor::Intel,
            vec![Box::new(ThermaldBackend::new(bus))],
        );
        let err = controller.set(Some(30.0), None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    fn rapl_root() -> (tempfile::TempDir, SysfsRoot) {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path().join(RAPL_BASE).join("intel-rapl:0");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("constraint_0_power_limit_uw"), "45000000\n").unwrap();
        fs::write(pkg.join("constraint_1_power_limit_uw"), "90000000\n").unwrap();
        fs::write(pkg.join("constraint_0_max_power_uw"), "65000000\n").unwrap();
        let sysfs = SysfsRoot::new(tmp.path());
        (tmp, sysfs)
    }

    #[test]
    fn test_rapl_read_and_range() {
        let (_tmp, sysfs) = rapl_root();
        let runner = Arc::new(FakeRunner::default());
        let rapl = RaplBackend::new(sysfs, runner);

        assert_eq!(
            rapl.read().unwrap(),
            Reading {
                pl1: 45.0,
                pl2: Some(90.0)
            }
        );
        let range = rapl.range().unwrap();
        assert_eq!(range.max, 65.0);
        assert!((range.min - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_rapl_write_uses_elevated_tee() {
        let (tmp, sysfs) = rapl_root();
        let runner = Arc::new(FakeRunner::default());
        let rapl = RaplBackend::new(sysfs, runner.clone());

        rapl.write(Some(35.0), None).unwrap();
        let path = tmp
            .path()
            .join(RAPL_BASE)
            .join("intel-rapl:0/constraint_0_power_limit_uw");
        let command = format!("pkexec tee {}", path.display());
        assert_eq!(runner.invocations(), vec![command.clone()]);
        assert_eq!(runner.input_for(&command).as_deref(), Some("35000000"));
    }

    #[test]
    fn test_rapl_write_failure_propagates() {
        let (tmp, sysfs) = rapl_root();
        let runner = Arc::new(FakeRunner::default());
        let path = tmp
            .path()
            .join(RAPL_BASE)
            .join("intel-rapl:0/constraint_0_power_limit_uw");
        runner.respond(
            &format!("pkexec tee {}", path.display()),
            CommandOutput::failed(127, ""),
        );
        let rapl = RaplBackend::new(sysfs, runner);
        assert!(rapl.write(Some(35.0), None).is_err());
    }

    #[test]
    fn test_parse_ryzenadj_info() {
        let info = "\
CPU Family: Rembrandt
|        Name         |   Value   |   Parameter      |
|---------------------|-----------|------------------|
| STAPM LIMIT         |    35.000 | stapm-limit      |
| STAPM VALUE         |     8.127 |                  |
| PPT LIMIT FAST      |    53.000 | fast-limit       |
";
        assert_eq!(parse_ryzenadj_info(info), (Some(35.0), Some(53.0)));
        assert_eq!(parse_ryzenadj_info("garbage"), (None, None));
    }

    #[test]
    fn test_ryzenadj_write_in_milliwatts() {
        let runner = Arc::new(FakeRunner::default());
        let ryzenadj = RyzenadjBackend::new(runner.clone());
        ryzenadj.write(Some(30.0), Some(45.5)).unwrap();
        assert_eq!(
            runner.invocations(),
            vec!["pkexec ryzenadj --stapm-limit=30000 --fast-limit=45500"]
        );
    }

    #[test]
    fn test_thermald_reads_tdp_values() {
        let bus = Arc::new(FakeBus::default());
        bus.reply("org.freedesktop.thermald", "GetTdpValues", json!([[28.0, 40.0]]));
        let thermald = ThermaldBackend::new(bus);
        assert_eq!(
            thermald.read().unwrap(),
            Reading {
                pl1: 28.0,
                pl2: Some(40.0)
            }
        );
    }

    #[test]
    fn test_detect_interfaces() {
        let (_tmp, sysfs) = rapl_root();
        let runner = FakeRunner::default();
        runner.respond("systemctl is-active thermald.service", CommandOutput::ok("active\n"));
        runner.install("ryzenadj");
        assert_eq!(
            detect_interfaces(&sysfs, &runner, "thermald"),
            vec![
                LimitsInterface::IntelRapl,
                LimitsInterface::Thermald,
                LimitsInterface::Ryzenadj
            ]
        );
    }
}
