use crate::command::CommandRunner;
use std::time::Duration;

const LSPCI_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteGpu {
    Nvidia,
    Amd,
    None,
}

impl std::fmt::Display for DiscreteGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscreteGpu::Nvidia => write!(f, "nvidia"),
            DiscreteGpu::Amd => write!(f, "amd"),
            DiscreteGpu::None => write!(f, "none"),
        }
    }
}

/// Classify from `lspci` output. Only display controller lines count;
/// an NVIDIA device wins over AMD.
pub fn classify_dgpu(lspci: &str) -> DiscreteGpu {
    let display: Vec<String> = lspci
        .lines()
        .map(str::to_lowercase)
        .filter(|l| l.contains("vga") || l.contains("3d controller"))
        .collect();

    if display.iter().any(|l| l.contains("nvidia")) {
        DiscreteGpu::Nvidia
    } else if display.iter().any(|l| l.contains("amd") || l.contains("radeon")) {
        DiscreteGpu::Amd
    } else {
        DiscreteGpu::None
    }
}

/// Any failure to run `lspci` reads as no discrete GPU.
pub fn detect_dgpu(runner: &dyn CommandRunner) -> DiscreteGpu {
    match runner.run("lspci", &[], LSPCI_TIMEOUT) {
        Ok(out) if out.success() => classify_dgpu(&out.stdout),
        Ok(out) => {
            tracing::debug!("lspci exited with {:?}: {}", out.status, out.stderr.trim());
            DiscreteGpu::None
        }
        Err(e) => {
            tracing::debug!("lspci unavailable: {}", e);
            DiscreteGpu::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::test_utils::FakeRunner;

    const HYBRID_NVIDIA: &str = "\
00:00.0 Host bridge: Advanced Micro Devices, Inc. [AMD] Family 17h-19h PCIe Root Complex
01:00.0 VGA compatible controller: NVIDIA Corporation GA107M [GeForce RTX 3050 Mobile] (rev a1)
05:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Rembrandt (rev c8)
";

    #[test]
    fn test_classify_nvidia_wins() {
        assert_eq!(classify_dgpu(HYBRID_NVIDIA), DiscreteGpu::Nvidia);
    }

    #[test]
    fn test_classify_3d_controller() {
        let out = "00:02.0 VGA compatible controller: Intel Corporation Alder Lake-P GT2\n\
                   01:00.0 3D controller: NVIDIA Corporation GA106M\n";
        assert_eq!(classify_dgpu(out), DiscreteGpu::Nvidia);
    }

    #[test]
    fn test_classify_ignores_non_display_devices() {
        let out = "00:00.0 Host bridge: Advanced Micro Devices, Inc. [AMD] Root Complex\n\
                   00:02.0 VGA compatible controller: Intel Corporation UHD Graphics\n";
        assert_eq!(classify_dgpu(out), DiscreteGpu::None);

        let out = "03:00.0 VGA compatible controller: ATI Radeon RX 6800M\n";
        assert_eq!(classify_dgpu(out), DiscreteGpu::Amd);
    }

    #[test]
    fn test_detect_failure_is_none() {
        let runner = FakeRunner::default();
        runner.respond("lspci", CommandOutput::failed(1, "pcilib: cannot open"));
        assert_eq!(detect_dgpu(&runner), DiscreteGpu::None);

        let missing = FakeRunner::default();
        missing.missing("lspci");
        assert_eq!(detect_dgpu(&missing), DiscreteGpu::None);
    }

    #[test]
    fn test_detect_from_output() {
        let runner = FakeRunner::default();
        runner.respond("lspci", CommandOutput::ok(HYBRID_NVIDIA));
        assert_eq!(detect_dgpu(&runner).to_string(), "nvidia");
    }
}
