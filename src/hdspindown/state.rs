use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};

use crate::hdspindown::diskstats::SectorCounters;
use crate::hdspindown::errors::SpindownError;

pub const DEFAULT_STATE_FILE: &str = "stats.json";

/// Last observed counters and the time they were first seen unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub read: u64,
    pub written: u64,
    /// Unix timestamp in whole seconds.
    pub time: i64,
}

impl CounterSnapshot {
    pub fn new(counters: SectorCounters, time: i64) -> CounterSnapshot {
        CounterSnapshot {
            read: counters.read,
            written: counters.written,
            time,
        }
    }

    pub fn counters(&self) -> SectorCounters {
        SectorCounters {
            read: self.read,
            written: self.written,
        }
    }
}

/// Reads the snapshot at `path`; `Ok(None)` when no file exists yet.
pub fn load_snapshot(path: &Path) -> Result<Option<CounterSnapshot>, SpindownError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SpindownError::state_io(path, e.to_string())),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SpindownError::state_io(path, e.to_string()))
}

/// Replaces the snapshot at `path` by writing `<path>.tmp` and renaming it over.
pub fn store_snapshot(path: &Path, snapshot: &CounterSnapshot) -> Result<(), SpindownError> {
    let json = serde_json::to_string(snapshot)
        .map_err(|e| SpindownError::state_io(path, e.to_string()))?;

    let tmp = sibling_path(path, ".tmp");
    let mut file = File::create(&tmp).map_err(|e| SpindownError::state_io(&tmp, e.to_string()))?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| SpindownError::state_io(&tmp, e.to_string()))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| SpindownError::state_io(path, e.to_string()))
}

/// Exclusive advisory lock on `<state file>.lock`, held until dropped.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state_path: &Path) -> Result<StateLock, SpindownError> {
        let path = sibling_path(state_path, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| SpindownError::state_io(&path, e.to_string()))?;

        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .map_err(|e| SpindownError::state_io(&path, e.to_string()))?;
        log::debug!("locked {}", path.display());

        Ok(StateLock { file, path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            Ok(()) => log::debug!("unlocked {}", self.path.display()),
            Err(e) => log::warn!("unable to unlock {}: {}", self.path.display(), e),
        }
    }
}

fn sibling_path(state_path: &Path, suffix: &str) -> PathBuf {
    let mut name = state_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
