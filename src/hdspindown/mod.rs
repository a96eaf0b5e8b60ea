use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::hdspindown::errors::SpindownError;
use crate::hdspindown::hdparm::{Hdparm, PowerControl, PowerState};
use crate::hdspindown::tracker::ActivityTracker;

pub mod diskstats;
pub mod errors;
pub mod hdparm;
pub mod state;
pub mod tracker;

pub const DEFAULT_DEVICE: &str = "sda";
pub const DEFAULT_THRESHOLD: u64 = 10 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub device: String,
    /// Seconds of unchanged counters required before spinning down.
    pub threshold: u64,
    pub state_path: PathBuf,
    pub counter_source: PathBuf,
    pub hdparm: PathBuf,
    pub tool_timeout: Option<Duration>,
    /// Only a confirmed idle state is eligible; `unknown` is not.
    pub strict_idle: bool,
    pub dry_run: bool,
}

impl Config {
    pub fn tracker(&self) -> ActivityTracker {
        ActivityTracker {
            device: self.device.clone(),
            threshold: self.threshold,
            state_path: self.state_path.clone(),
            counter_source: self.counter_source.clone(),
        }
    }

    pub fn power_control(&self) -> Hdparm {
        Hdparm {
            program: self.hdparm.clone(),
            device: self.device.clone(),
            timeout: self.tool_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The drive was not in a state that allows spinning down.
    Ineligible(PowerState),
    /// The drive saw activity recently.
    Busy,
    SpunDown,
    WouldSpinDown,
}

/// One pass of the spin-down decision for the configured device.
pub fn run(
    config: &Config,
    tracker: &ActivityTracker,
    power: &dyn PowerControl,
    now: i64,
) -> Result<Outcome, SpindownError> {
    let status = power.current_status()?;
    println!("current status: {}", status);

    if !status.is_idle_like(config.strict_idle) {
        log::debug!("{} is {}, nothing to do", config.device, status);
        return Ok(Outcome::Ineligible(status));
    }

    if !tracker.should_spin_down(now)? {
        return Ok(Outcome::Busy);
    }

    if config.dry_run {
        println!("would spin down {} (dry run)", config.device);
        return Ok(Outcome::WouldSpinDown);
    }

    println!("spinning down...");
    power.spin_down()?;
    Ok(Outcome::SpunDown)
}

/// Whole seconds since the Unix epoch; negative if the clock is set before it.
pub fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = -(before.as_secs() as i64);
            if before.subsec_nanos() > 0 { secs - 1 } else { secs }
        }
    }
}
