use crate::command::CommandRunner;
use crate::error::{Error, Result};
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const ELEVATED_TIMEOUT: Duration = Duration::from_secs(15);

/// Liveness of a systemd unit, encoded for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Inactive = 0,
    Active = 1,
    Unknown = 2,
}

impl ServiceState {
    pub fn from_is_active(output: &str) -> Self {
        match output.trim() {
            "active" => ServiceState::Active,
            "inactive" | "failed" => ServiceState::Inactive,
            _ => ServiceState::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

fn unit_name(service: &str) -> String {
    if service.contains('.') {
        service.to_string()
    } else {
        format!("{}.service", service)
    }
}

/// `systemctl is-active`; any failure to ask reads as unknown.
pub fn service_state(runner: &dyn CommandRunner, service: &str) -> ServiceState {
    let unit = unit_name(service);
    match runner.run("systemctl", &["is-active", &unit], QUERY_TIMEOUT) {
        Ok(out) => {
            let state = ServiceState::from_is_active(&out.stdout);
            tracing::debug!("{} is {} ({:?})", unit, out.stdout.trim(), state);
            state
        }
        Err(e) => {
            tracing::debug!("cannot query {}: {}", unit, e);
            ServiceState::Unknown
        }
    }
}

/// Enable and start, or disable and stop, the nvidia-powerd unit.
pub fn set_nvidia_powerd(runner: &dyn CommandRunner, service: &str, enable: bool) -> Result<()> {
    let unit = unit_name(service);
    let steps: [&str; 2] = if enable {
        ["enable", "start"]
    } else {
        ["disable", "stop"]
    };
    for action in steps {
        tracing::info!("systemctl {} {}", action, unit);
        runner
            .run("pkexec", &["systemctl", action, &unit], ELEVATED_TIMEOUT)?
            .into_success("pkexec")
            .map_err(|e| Error::Other(format!("Failed to {} {}: {}", action, unit, e)))?;
    }
    Ok(())
}
