//! Internal panel refresh rate.
//!
//! Tools are tried in order: `kscreen-doctor` (KDE, Wayland and X11), then
//! `xrandr`. A tool that runs decides the answer; the next one is only asked
//! when the previous could not run at all.

use crate::command::CommandRunner;
use crate::config::DisplayConfig;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const SET_TIMEOUT: Duration = Duration::from_secs(10);

/// Reported when no tool knows the active mode.
pub const DEFAULT_RATE: f64 = 60.0;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid regex")
});
static KSCREEN_ACTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+):\S*@(\d+(?:\.\d+)?)\*").expect("valid regex"));
static XRANDR_ACTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.?\d*)\*").expect("valid regex"));

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

fn resolution_modes(resolution: &str) -> Regex {
    // Resolution comes from config; escape it so "1920x1080" stays literal.
    let pattern = format!(r"(\d+):{}@(\d+(?:\.\d+)?)[*!]*", regex::escape(resolution));
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new(r"$^").expect("valid regex"))
}

/// Whole-number rates at or above `min_rate`, sorted and deduplicated.
fn usable_rates(rates: impl IntoIterator<Item = f64>, min_rate: u32) -> Vec<u32> {
    let mut rates: Vec<u32> = rates
        .into_iter()
        .filter(|r| *r >= min_rate as f64)
        .map(|r| r as u32)
        .collect();
    rates.sort_unstable();
    rates.dedup();
    rates
}

pub trait DisplayTool {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the tool ran but reported no active mode.
    fn current_rate(&self) -> Result<Option<f64>>;

    fn supported_rates(&self, resolution: &str) -> Result<Vec<f64>>;

    fn set_rate(&self, rate: f64, resolution: &str) -> Result<()>;
}

pub struct KscreenDoctor {
    runner: Arc<dyn CommandRunner>,
}

impl KscreenDoctor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn outputs(&self) -> Result<String> {
        let out = self
            .runner
            .run("kscreen-doctor", &["-o"], QUERY_TIMEOUT)?
            .into_success("kscreen-doctor")?;
        Ok(strip_ansi(&out.stdout))
    }
}

/// Name and mode id of the internal panel's mode at `rate`.
pub fn kscreen_panel_mode(outputs: &str, resolution: &str, rate: f64) -> Option<(String, String)> {
    let modes = resolution_modes(resolution);
    let wanted = rate.trunc();
    let mut panel: Option<String> = None;
    for line in outputs.lines() {
        if line.contains("Output:") {
            panel = if line.contains("eDP") {
                line.split_whitespace().nth(2).map(str::to_string)
            } else {
                None
            };
        } else if line.contains("Modes:") {
            let Some(name) = panel.as_ref() else {
                continue;
            };
            let id = modes.captures_iter(line).find_map(|c| {
                let candidate: f64 = c[2].parse().ok()?;
                (candidate.trunc() == wanted).then(|| c[1].to_string())
            });
            if let Some(id) = id {
                return Some((name.clone(), id));
            }
        }
    }
    None
}

impl DisplayTool for KscreenDoctor {
    fn name(&self) -> &'static str {
        "kscreen-doctor"
    }

    fn current_rate(&self) -> Result<Option<f64>> {
        let outputs = self.outputs()?;
        Ok(outputs
            .lines()
            .filter(|line| line.contains("Modes:"))
            .find_map(|line| KSCREEN_ACTIVE.captures(line))
            .and_then(|c| c[2].parse().ok()))
    }

    fn supported_rates(&self, resolution: &str) -> Result<Vec<f64>> {
        let outputs = self.outputs()?;
        let modes = resolution_modes(resolution);
        Ok(outputs
            .lines()
            .filter(|line| line.contains("Modes:"))
            .flat_map(|line| {
                modes
                    .captures_iter(line)
                    .filter_map(|c| c[2].parse::<f64>().ok())
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    fn set_rate(&self, rate: f64, resolution: &str) -> Result<()> {
        let outputs = self.outputs()?;
        let (name, id) = kscreen_panel_mode(&outputs, resolution, rate).ok_or_else(|| {
            Error::Unsupported(format!("no {}@{} mode on the internal panel", resolution, rate))
        })?;
        let target = format!("output.{}.mode.{}", name, id);
        tracing::info!("kscreen-doctor {}", target);
        self.runner
            .run("kscreen-doctor", &[&target], SET_TIMEOUT)?
            .into_success("kscreen-doctor")?;
        Ok(())
    }
}

pub struct Xrandr {
    runner: Arc<dyn CommandRunner>,
}

impl Xrandr {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn current(&self) -> Result<String> {
        let out = self
            .runner
            .run("xrandr", &["--current"], QUERY_TIMEOUT)?
            .into_success("xrandr")?;
        Ok(out.stdout)
    }
}

fn is_connected(line: &str) -> bool {
    line.contains(" connected")
}

/// The primary connected output, else the first connected one.
pub fn xrandr_primary(listing: &str) -> Option<&str> {
    let connected = || listing.lines().filter(|l| is_connected(l));
    connected()
        .find(|l| l.contains("primary"))
        .or_else(|| connected().next())
        .and_then(|l| l.split_whitespace().next())
}

/// Rates listed on `resolution`'s mode line under the primary output.
pub fn xrandr_rates(listing: &str, resolution: &str) -> Vec<f64> {
    let Some(primary) = xrandr_primary(listing) else {
        return Vec::new();
    };
    let mut in_primary = false;
    for line in listing.lines() {
        if !line.starts_with(char::is_whitespace) {
            in_primary = line.split_whitespace().next() == Some(primary) && is_connected(line);
            continue;
        }
        let mut tokens = line.split_whitespace();
        if in_primary && tokens.next() == Some(resolution) {
            return tokens
                .filter_map(|t| t.trim_end_matches(['*', '+']).parse().ok())
                .collect();
        }
    }
    Vec::new()
}

impl DisplayTool for Xrandr {
    fn name(&self) -> &'static str {
        "xrandr"
    }

    fn current_rate(&self) -> Result<Option<f64>> {
        let listing = self.current()?;
        Ok(listing
            .lines()
            .filter(|line| line.contains('*'))
            .find_map(|line| XRANDR_ACTIVE.captures(line))
            .and_then(|c| c[1].parse().ok()))
    }

    fn supported_rates(&self, resolution: &str) -> Result<Vec<f64>> {
        Ok(xrandr_rates(&self.current()?, resolution))
    }

    fn set_rate(&self, rate: f64, _resolution: &str) -> Result<()> {
        let listing = self.current()?;
        let output = xrandr_primary(&listing)
            .ok_or_else(|| Error::Other("No display found".into()))?
            .to_string();
        let rate = rate.to_string();
        tracing::info!("xrandr --output {} --rate {}", output, rate);
        self.runner
            .run("xrandr", &["--output", &output, "--rate", &rate], SET_TIMEOUT)?
            .into_success("xrandr")
            .map_err(|e| Error::Other(format!("Failed to set refresh rate: {}", e)))?;
        Ok(())
    }
}

pub struct DisplayController {
    tools: Vec<Box<dyn DisplayTool>>,
    settings: DisplayConfig,
}

impl DisplayController {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: DisplayConfig) -> Self {
        Self::with_tools(
            vec![
                Box::new(KscreenDoctor::new(runner.clone())),
                Box::new(Xrandr::new(runner)),
            ],
            settings,
        )
    }

    pub fn with_tools(tools: Vec<Box<dyn DisplayTool>>, settings: DisplayConfig) -> Self {
        Self { tools, settings }
    }

    pub fn current_rate(&self) -> f64 {
        for tool in &self.tools {
            match tool.current_rate() {
                Ok(rate) => return rate.unwrap_or(DEFAULT_RATE),
                Err(e) => tracing::debug!("{} cannot report refresh rate: {}", tool.name(), e),
            }
        }
        DEFAULT_RATE
    }

    pub fn supported_rates(&self) -> Vec<u32> {
        let resolution = &self.settings.panel_resolution;
        let listed = self.tools.iter().find_map(|tool| {
            tool.supported_rates(resolution)
                .inspect_err(|e| tracing::debug!("{} cannot list modes: {}", tool.name(), e))
                .ok()
        });
        let rates = usable_rates(listed.unwrap_or_default(), self.settings.min_rate);
        if rates.is_empty() {
            self.settings.fallback_rates.clone()
        } else {
            rates
        }
    }

    pub fn max_rate(&self) -> u32 {
        self.supported_rates().into_iter().max().unwrap_or(144)
    }

    pub fn set_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Validation(format!("Invalid refresh rate: {}", rate)));
        }
        let mut last = None;
        for tool in &self.tools {
            match tool.set_rate(rate, &self.settings.panel_resolution) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("{} could not set {}Hz: {}", tool.name(), rate, e);
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Unsupported("No display tool available".into())))
    }
}
