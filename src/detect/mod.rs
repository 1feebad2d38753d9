//! Read-only probes of battery, CPU, GPU and sensor state.

pub mod battery;
pub mod cpu;
pub mod gpu;
pub mod hwmon;
