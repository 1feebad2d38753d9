pub mod auto;
pub mod bus;
pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod control;
pub mod deadline;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod status;
pub mod sysfs;

#[cfg(test)]
pub mod test_utils;
