//! CTOWatch modules

pub mod commands;
pub mod cto_monitor;

pub use commands::Command;
pub use cto_monitor::{CtoMonitor, MonitorSettings};
