//! Shared utilities

pub mod logger;
pub mod signal;
pub mod timer;

pub use signal::{install_ctrl_c_handler, InterruptFlag};
pub use timer::Timer;

/// Name of this machine, recorded against the batches it runs
pub fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}
