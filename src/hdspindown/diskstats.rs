use std::fs::read_to_string;
use std::path::Path;

use crate::hdspindown::errors::SpindownError;

pub const DEFAULT_COUNTER_SOURCE: &str = "/proc/diskstats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorCounters {
    pub read: u64,
    pub written: u64,
}

pub fn get_sector_counters(source: &Path, dev: &str) -> Result<SectorCounters, SpindownError> {
    let content = read_to_string(source)
        .map_err(|e| SpindownError::counter_unavailable(dev, source, e.to_string()))?;

    match parse_sector_counters(&content, dev) {
        Some(Ok(counters)) => Ok(counters),
        Some(Err(message)) => Err(SpindownError::counter_unavailable(dev, source, message)),
        None => Err(SpindownError::counter_unavailable(
            dev,
            source,
            String::from("device not listed"),
        )),
    }
}

/// Finds the first line naming `dev` and returns its sector counters.
///
/// `None` when the device is not listed at all.
// see https://www.kernel.org/doc/Documentation/ABI/testing/procfs-diskstats
fn parse_sector_counters(content: &str, dev: &str) -> Option<Result<SectorCounters, String>> {
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || fields[2] != dev {
            continue;
        }

        let read = fields[5].parse::<u64>();
        let written = fields[9].parse::<u64>();
        return Some(match (read, written) {
            (Ok(read), Ok(written)) => Ok(SectorCounters { read, written }),
            _ => Err(format!(
                "invalid sector counters `{}`/`{}`",
                fields[5], fields[9]
            )),
        });
    }
    None
}
