//! Interrupt handling
//!
//! Ctrl-C only raises a flag. Long-running loops check it at safe points and
//! wind down on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared "stop starting new work" flag
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raise `flag` on Ctrl-C. Later interrupts are only logged.
pub fn install_ctrl_c_handler(flag: InterruptFlag) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if flag.is_set() {
                warn!("Already interrupted, waiting for running tests to finish");
            } else {
                info!("Interrupted, finishing current work");
                flag.set();
            }
        }
    });
}
