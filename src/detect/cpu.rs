use crate::sysfs::SysfsRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

impl CpuVendor {
    pub fn detect(sysfs: &SysfsRoot) -> Self {
        match sysfs.read("proc/cpuinfo") {
            Ok(cpuinfo) => Self::from_cpuinfo(&cpuinfo),
            Err(e) => {
                tracing::debug!("cannot read cpuinfo: {}", e);
                CpuVendor::Unknown
            }
        }
    }

    /// Substring match over the whole of `/proc/cpuinfo`; "Intel" is checked first.
    pub fn from_cpuinfo(cpuinfo: &str) -> Self {
        if cpuinfo.contains("Intel") {
            CpuVendor::Intel
        } else if cpuinfo.contains("AMD") {
            CpuVendor::Amd
        } else {
            CpuVendor::Unknown
        }
    }
}

impl std::fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuVendor::Intel => write!(f, "Intel"),
            CpuVendor::Amd => write!(f, "AMD"),
            CpuVendor::Unknown => write!(f, "unknown"),
        }
    }
}
