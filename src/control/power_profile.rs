use crate::bus::{self, Bus, BusTarget, BusValue};
use crate::error::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const POWER_PROFILES: BusTarget = BusTarget {
    service: "net.hadess.PowerProfiles",
    path: "/net/hadess/PowerProfiles",
    interface: "net.hadess.PowerProfiles",
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

fn wrap(operation: &'static str) -> impl FnOnce(Error) -> Error {
    move |source| Error::ProfileOperation {
        operation,
        source: Box::new(source),
    }
}

/// Client of power-profiles-daemon. The supported set is read once at connect.
pub struct PowerProfileController {
    bus: Arc<dyn Bus>,
    supported: Vec<String>,
}

impl PowerProfileController {
    pub fn connect(bus: Arc<dyn Bus>) -> Result<Self> {
        let profiles = bus
            .get_property(&POWER_PROFILES, "Profiles", READ_TIMEOUT)
            .and_then(|v| parse_profiles(&v))
            .map_err(wrap("read supported"))?;
        tracing::debug!("supported power profiles: {:?}", profiles);
        Ok(Self {
            bus,
            supported: profiles,
        })
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    pub fn active(&self) -> Result<String> {
        self.bus
            .get_property(&POWER_PROFILES, "ActiveProfile", READ_TIMEOUT)
            .and_then(|v| bus::json_str(&v, "ActiveProfile"))
            .map_err(wrap("get active"))
    }

    pub fn set(&self, profile: &str) -> Result<()> {
        if !self.supported.iter().any(|p| p == profile) {
            return Err(Error::Validation(format!(
                "Invalid profile: {}. Supported profiles are: {}",
                profile,
                self.supported.join(", ")
            )));
        }
        tracing::info!("setting power profile to {}", profile);
        self.bus
            .set_property(
                &POWER_PROFILES,
                "ActiveProfile",
                &BusValue::Str(profile.to_string()),
                WRITE_TIMEOUT,
            )
            .map_err(wrap("set"))
    }
}

/// `Profiles` is `aa{sv}`; each dict carries its name under `Profile`.
/// busctl renders variants as `{"type", "data"}`.
fn parse_profiles(value: &Value) -> Result<Vec<String>> {
    bus::json_array(value, "Profiles")?
        .iter()
        .map(|entry| {
            let name = entry.get("Profile").map(|p| p.get("data").unwrap_or(p));
            match name.and_then(Value::as_str) {
                Some(name) => Ok(name.to_string()),
                None => Err(Error::BadReply {
                    member: "Profiles".into(),
                    detail: format!("entry without a profile name: {}", entry),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBus;
    use serde_json::json;

    const IFACE: &str = "net.hadess.PowerProfiles";

    fn fake() -> Arc<FakeBus> {
        let bus = FakeBus::default();
        bus.set(
            IFACE,
            "Profiles",
            json!([
                {"Profile": {"type": "s", "data": "power-saver"}, "Driver": {"type": "s", "data": "platform_profile"}},
                {"Profile": {"type": "s", "data": "balanced"}},
                {"Profile": "performance"}
            ]),
        );
        bus.set(IFACE, "ActiveProfile", json!("balanced"));
        Arc::new(bus)
    }

    #[test]
    fn test_connect_reads_supported() {
        let controller = PowerProfileController::connect(fake()).unwrap();
        assert_eq!(controller.supported(), ["power-saver", "balanced", "performance"]);
        assert_eq!(controller.active().unwrap(), "balanced");
    }

    #[test]
    fn test_set_valid_profile() {
        let bus = fake();
        let controller = PowerProfileController::connect(bus.clone()).unwrap();
        controller.set("performance").unwrap();
        assert_eq!(
            bus.writes(),
            vec![(format!("{}.ActiveProfile", IFACE), json!("performance"))]
        );
        assert_eq!(controller.active().unwrap(), "performance");
    }

    #[test]
    fn test_set_unsupported_profile_does_not_write() {
        let bus = fake();
        let controller = PowerProfileController::connect(bus.clone()).unwrap();
        let err = controller.set("turbo").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Invalid profile: turbo. Supported profiles are: power-saver, balanced, performance"
        );
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn test_bus_failures_are_wrapped() {
        let bus = fake();
        let controller = PowerProfileController::connect(bus.clone()).unwrap();

        bus.time_out(IFACE, "ActiveProfile");
        let err = controller.active().unwrap_err();
        assert!(matches!(err, Error::ProfileOperation { .. }));
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("failed to get active power profile"));
    }

    #[test]
    fn test_connect_fails_when_service_down() {
        let bus = fake();
        bus.service_down("net.hadess.PowerProfiles");
        assert!(PowerProfileController::connect(bus).is_err());
    }
}
