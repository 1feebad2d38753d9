pub mod armoury;
pub mod charge;
pub mod display;
pub mod gpu_mode;
pub mod lighting;
pub mod power_limits;
pub mod power_profile;
pub mod services;
pub mod turbo;
