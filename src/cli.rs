use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tufctl",
    about = "Hardware control helper for ASUS TUF laptops",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Print diagnostics to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Output as JSON where a command reports state
    #[arg(long, global = true)]
    pub json: bool,

    /// Read configuration from this file instead of the system/user files
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

fn switch() -> clap::builder::RangedI64ValueParser<u8> {
    clap::value_parser!(u8).range(0..=1)
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the 14-line system status report
    Status,

    /// Set the power profile (power-saver, balanced, performance)
    Profile { name: String },

    /// Switch the GPU mode through supergfxd
    Gpu { mode: String },

    /// Set the battery charge limit (50-100)
    Charge { limit: String },

    /// Enable (1) or disable (0) CPU turbo boost
    Turbo {
        #[arg(value_parser = switch())]
        enabled: u8,
    },

    /// Print PL1, PL2, minimum and maximum power limits in watts
    PowerLimits,

    /// Set PL1 and/or PL2 in watts; "null" leaves a limit unchanged
    SetPowerLimits {
        pl1: String,
        pl2: Option<String>,
    },

    /// Print keyboard LED mode and power states
    #[command(name = "ledstatus")]
    LedStatus,

    /// Print keyboard brightness
    #[command(name = "ledbrightnessstatus")]
    LedBrightnessStatus,

    /// Set keyboard lighting per system state (1/true/yes is on)
    #[command(name = "ledpower")]
    LedPower {
        boot: String,
        awake: String,
        sleep: String,
        shutdown: String,
    },

    /// Set the keyboard LED mode
    #[command(name = "ledmode")]
    LedMode { mode: u32 },

    /// Set the keyboard brightness level
    #[command(name = "ledbrightness")]
    LedBrightness { level: u32 },

    /// Set the keyboard colour, optionally with a LED mode
    #[command(name = "ledcolor")]
    LedColor {
        red: u8,
        green: u8,
        blue: u8,
        #[arg(default_value_t = 0)]
        mode: u32,
    },

    /// Keyboard lighting during sleep
    #[command(name = "ledsleep")]
    LedSleep { action: SleepLighting },

    /// Print CPU and GPU fan speeds
    FanSpeeds,

    /// Print the discrete GPU vendor (nvidia, amd or none)
    DetectDgpu,

    /// Print the battery charging status code
    BatteryChargingStatus,

    /// Enable (1) or disable (0) panel overdrive
    PanelOverdrive {
        #[arg(value_parser = switch())]
        enabled: u8,
    },

    /// Set the internal panel refresh rate
    RefreshRate { rate: f64 },

    /// Print the supported refresh rates, comma separated
    GetSupportedRates,

    /// Pick refresh rate and panel overdrive from the battery state
    AutoRefreshPanel,

    /// Toggle a one-time charge to 100%
    OneShotCharge,

    /// Enable (1) or disable (0) the nvidia-powerd service
    NvidiaPowerd {
        #[arg(value_parser = switch())]
        enabled: u8,
    },

    /// Terminate child processes started by this invocation
    #[command(name = "terminate_all_processes")]
    TerminateAllProcesses,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (auto-detected if omitted)
        shell: Option<Shell>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SleepLighting {
    /// Lighting off while asleep
    Off,
    /// Lighting on while asleep
    On,
    /// Lowest brightness, dim blue, on while asleep
    Dim,
}

/// Print shell completions to stdout.
pub fn print_completions(shell: Option<Shell>) -> anyhow::Result<()> {
    let shell = shell.or_else(Shell::from_env).ok_or_else(|| {
        anyhow::anyhow!(
            "Could not detect shell. Specify one: tufctl completions bash|zsh|fish|elvish|powershell"
        )
    })?;
    clap_complete::generate(shell, &mut Cli::command(), "tufctl", &mut std::io::stdout());
    Ok(())
}
