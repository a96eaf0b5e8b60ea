use std::path::PathBuf;

use crate::hdspindown::diskstats::get_sector_counters;
use crate::hdspindown::errors::SpindownError;
use crate::hdspindown::state::{load_snapshot, store_snapshot, CounterSnapshot, StateLock};

/// Decides from persisted sector counters whether a device has been idle long enough.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    pub device: String,
    pub threshold: u64,
    pub state_path: PathBuf,
    pub counter_source: PathBuf,
}

impl ActivityTracker {
    /// Returns `true` once the counters have stayed unchanged for at least
    /// `threshold` seconds before `now`.
    ///
    /// Any change in the counters, including a drop after a reboot, restarts
    /// the idle clock. The snapshot keeps the time idleness began and is not
    /// touched while the counters stay the same.
    pub fn should_spin_down(&self, now: i64) -> Result<bool, SpindownError> {
        let current = get_sector_counters(&self.counter_source, &self.device)?;
        log::debug!("{} counters {:?}", self.device, current);

        let _lock = StateLock::acquire(&self.state_path)?;

        let snapshot = match load_snapshot(&self.state_path)? {
            Some(snapshot) => snapshot,
            None => {
                println!("stats file does not exist");
                self.update(CounterSnapshot::new(current, now))?;
                return Ok(false);
            }
        };

        if snapshot.counters() != current {
            println!("read/written updated");
            self.update(CounterSnapshot::new(current, now))?;
            return Ok(false);
        }

        let idle_for = now.saturating_sub(snapshot.time);
        log::debug!("{} idle for {}s (threshold {}s)", self.device, idle_for, self.threshold);
        Ok(idle_for >= 0 && idle_for as u64 >= self.threshold)
    }

    fn update(&self, snapshot: CounterSnapshot) -> Result<(), SpindownError> {
        println!(
            "updating stats file: {}/{} ({})",
            snapshot.read, snapshot.written, snapshot.time
        );
        store_snapshot(&self.state_path, &snapshot)
    }
}
