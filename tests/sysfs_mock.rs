use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tufctl::command::{ChildRegistry, CommandRunner, SystemRunner};
use tufctl::control::charge::ChargeLimit;
use tufctl::control::power_limits::{LimitsBackend, PowerLimitsController, RaplBackend};
use tufctl::control::turbo::{TurboController, TurboKnob};
use tufctl::deadline::Deadline;
use tufctl::detect::battery::{self, BatteryChargingStatus};
use tufctl::detect::cpu::CpuVendor;
use tufctl::detect::hwmon;
use tufctl::sysfs::SysfsRoot;

/// Mock sysfs tree of an Intel TUF laptop: asus + coretemp hwmon chips,
/// BAT1 with a charge threshold, an AC adapter, intel_pstate and RAPL.
fn create_tuf_intel_fixture(root: &Path) {
    let hwmon = root.join("sys/class/hwmon");
    let coretemp = hwmon.join("hwmon0");
    fs::create_dir_all(&coretemp).unwrap();
    fs::write(coretemp.join("name"), "coretemp\n").unwrap();
    fs::write(coretemp.join("temp1_input"), "61000\n").unwrap();

    let asus = hwmon.join("hwmon1");
    fs::create_dir_all(&asus).unwrap();
    fs::write(asus.join("name"), "asus\n").unwrap();
    fs::write(asus.join("fan1_input"), "3100\n").unwrap();
    fs::write(asus.join("fan2_input"), "2900\n").unwrap();
    fs::write(asus.join("temp1_input"), "45000\n").unwrap();

    let supply = root.join("sys/class/power_supply");
    let bat = supply.join("BAT1");
    fs::create_dir_all(&bat).unwrap();
    fs::write(bat.join("status"), "Charging\n").unwrap();
    fs::write(bat.join("capacity"), "64\n").unwrap();
    fs::write(bat.join("charge_control_end_threshold"), "100\n").unwrap();

    let ac = supply.join("ADP1");
    fs::create_dir_all(&ac).unwrap();
    fs::write(ac.join("type"), "Mains\n").unwrap();
    fs::write(ac.join("online"), "1\n").unwrap();

    let pstate = root.join("sys/devices/system/cpu/intel_pstate");
    fs::create_dir_all(&pstate).unwrap();
    fs::write(pstate.join("no_turbo"), "1\n").unwrap();

    fs::create_dir_all(root.join("proc")).unwrap();
    fs::write(
        root.join("proc/cpuinfo"),
        "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: 12th Gen Intel(R) Core(TM) i7-12700H\n\n",
    )
    .unwrap();

    let rapl = root.join("sys/class/powercap/intel-rapl/intel-rapl:0");
    fs::create_dir_all(&rapl).unwrap();
    fs::write(rapl.join("constraint_0_power_limit_uw"), "45000000\n").unwrap();
    fs::write(rapl.join("constraint_1_power_limit_uw"), "115000000\n").unwrap();
    fs::write(rapl.join("constraint_0_max_power_uw"), "100000000\n").unwrap();
}

fn runner() -> Arc<dyn CommandRunner> {
    Arc::new(SystemRunner::new(Deadline::default(), ChildRegistry::default()))
}

#[test]
fn test_hwmon_readings() {
    let tmp = TempDir::new().unwrap();
    create_tuf_intel_fixture(tmp.path());
    let sysfs = SysfsRoot::new(tmp.path());

    let fans = hwmon::fan_speeds(&sysfs);
    assert_eq!(fans.cpu_display(), "3100 RPM");
    assert_eq!(fans.gpu_display(), "2900 RPM");
    assert_eq!(
        hwmon::render_temperature(hwmon::cpu_temperature(&sysfs)),
        "61.0°C"
    );
}

#[test]
fn test_battery_status_on_mains() {
    let tmp = TempDir::new().unwrap();
    create_tuf_intel_fixture(tmp.path());
    let sysfs = SysfsRoot::new(tmp.path());

    assert_eq!(
        battery::charging_status(&sysfs),
        BatteryChargingStatus::AcCharging
    );
    assert_eq!(battery::charging_status(&sysfs).to_string(), "1");
}

#[test]
fn test_charge_limit_set_and_read_back() {
    let tmp = TempDir::new().unwrap();
    create_tuf_intel_fixture(tmp.path());
    let sysfs = SysfsRoot::new(tmp.path());

    let limit = ChargeLimit::new(&sysfs, None);
    assert_eq!(limit.current(), "100");
    limit.set(80).unwrap();
    assert_eq!(limit.current(), "80");
    let written = fs::read_to_string(
        tmp.path()
            .join("sys/class/power_supply/BAT1/charge_control_end_threshold"),
    )
    .unwrap();
    assert_eq!(written.trim(), "80");

    assert!(limit.set(45).is_err());
    assert_eq!(limit.current(), "80");
}

#[test]
fn test_charge_limit_without_battery() {
    let tmp = TempDir::new().unwrap();
    let sysfs = SysfsRoot::new(tmp.path());

    let limit = ChargeLimit::new(&sysfs, None);
    assert_eq!(limit.current(), "100");
    let err = limit.set(80).unwrap_err();
    assert!(err.to_string().contains("Battery charge limit file"));
}

#[test]
fn test_turbo_toggle_with_intel_polarity() {
    let tmp = TempDir::new().unwrap();
    create_tuf_intel_fixture(tmp.path());
    let sysfs = SysfsRoot::new(tmp.path());
    let no_turbo = tmp.path().join("sys/devices/system/cpu/intel_pstate/no_turbo");

    let turbo = TurboController::detect(&sysfs);
    assert_eq!(turbo.knob(), TurboKnob::IntelNoTurbo);
    assert!(!turbo.enabled().unwrap());

    turbo.enable().unwrap();
    assert_eq!(fs::read_to_string(&no_turbo).unwrap().trim(), "0");
    assert!(turbo.status().enabled);

    turbo.disable().unwrap();
    assert_eq!(fs::read_to_string(&no_turbo).unwrap().trim(), "1");
}

#[test]
fn test_rapl_limits_from_mock_tree() {
    let tmp = TempDir::new().unwrap();
    create_tuf_intel_fixture(tmp.path());
    let sysfs = SysfsRoot::new(tmp.path());

    let rapl = RaplBackend::new(sysfs.clone(), runner());
    let reading = rapl.read().unwrap();
    assert_eq!(reading.pl1, 45.0);
    assert_eq!(reading.pl2, Some(115.0));

    let controller = PowerLimitsController::with_backends(
        CpuVendor::detect(&sysfs),
        vec![Box::new(rapl)],
    );
    assert_eq!(controller.vendor(), CpuVendor::Intel);
    let range = controller.range();
    assert!((range.min - 20.0).abs() < 1e-9);
    assert!((range.max - 100.0).abs() < 1e-9);
    assert_eq!(
        controller.current().lines(),
        ["45.0", "115.0", "20.0", "100.0"]
    );
}

#[test]
fn test_power_limits_without_any_interface() {
    let tmp = TempDir::new().unwrap();
    let sysfs = SysfsRoot::new(tmp.path());

    let controller = PowerLimitsController::with_backends(
        CpuVendor::detect(&sysfs),
        vec![Box::new(RaplBackend::new(sysfs.clone(), runner()))],
    );
    assert_eq!(
        controller.current().lines(),
        ["52.5", "65.6", "10.0", "95.0"]
    );
    assert!(controller.set(Some(200.0), None).is_err());
}
