//! Cooperative interrupt handling.
//!
//! The first signal only flips a shared flag. The sync pass polls it between
//! audits and formats, and the relational writer polls it before committing.
//! A second signal exits at once, for when the current step is stuck.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(250);
/// Exit status for a forced exit, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// What to do about an incoming interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Finish the current step, then stop.
    Finish,
    /// An earlier interrupt is still pending; stop now.
    ForceExit,
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT/SIGTERM (Ctrl+C on windows) into this flag. A repeated
    /// signal exits the process.
    pub fn install_handlers(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};
            use signal_hook::iterator::Signals;

            let mut signals = Signals::new([SIGINT, SIGTERM])?;
            let shutdown = self.clone();
            thread::spawn(move || {
                for sig in signals.forever() {
                    shutdown.handle_signal(&format!("signal {}", sig));
                }
            });
        }

        #[cfg(windows)]
        {
            let shutdown = self.clone();
            ctrlc::set_handler(move || shutdown.handle_signal("Ctrl+C"))?;
        }

        Ok(())
    }

    fn handle_signal(&self, source: &str) {
        match self.on_signal() {
            SignalAction::Finish => info!("Received {}, finishing current step", source),
            SignalAction::ForceExit => {
                warn!("Received {} again, exiting immediately", source);
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    }

    /// Record an interrupt and report whether it is the first one.
    pub fn on_signal(&self) -> SignalAction {
        if self.flag.swap(true, Ordering::SeqCst) {
            SignalAction::ForceExit
        } else {
            SignalAction::Finish
        }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown is requested first. Returns
    /// false when the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
