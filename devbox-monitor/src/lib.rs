//! On-host idle monitor: samples activity signals, keeps a local activity record and
//! stops the machine once it has stayed idle past the threshold and a grace period.

pub mod config;
pub mod logging;
pub mod monitor;
pub mod sources;
pub mod stopper;
pub mod store;

pub use config::MonitorConfig;
pub use monitor::{CycleOutcome, IdleMonitor, RunExit};
