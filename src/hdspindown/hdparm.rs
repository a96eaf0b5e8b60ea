use std::fmt;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::hdspindown::errors::SpindownError;

pub const DEFAULT_HDPARM: &str = "hdparm";

const QUERY_POWER_MODE: &str = "-C";
const STANDBY_NOW: &str = "-y";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Drive state as printed by `hdparm -C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    ActiveOrIdle,
    Idle,
    IdleA,
    IdleB,
    IdleC,
    Standby,
    Sleeping,
    Unknown,
    Other(String),
}

impl PowerState {
    pub fn from_token(token: &str) -> PowerState {
        match token {
            "active/idle" => PowerState::ActiveOrIdle,
            "idle" => PowerState::Idle,
            "idle_a" => PowerState::IdleA,
            "idle_b" => PowerState::IdleB,
            "idle_c" => PowerState::IdleC,
            "standby" => PowerState::Standby,
            "sleeping" => PowerState::Sleeping,
            "unknown" => PowerState::Unknown,
            other => PowerState::Other(other.to_string()),
        }
    }

    /// Whether a spin-down may be considered from this state.
    ///
    /// `Unknown` counts unless `strict` is set.
    pub fn is_idle_like(&self, strict: bool) -> bool {
        match self {
            PowerState::ActiveOrIdle
            | PowerState::Idle
            | PowerState::IdleA
            | PowerState::IdleB
            | PowerState::IdleC => true,
            PowerState::Unknown => !strict,
            _ => false,
        }
    }
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::ActiveOrIdle => write!(f, "active/idle"),
            PowerState::Idle => write!(f, "idle"),
            PowerState::IdleA => write!(f, "idle_a"),
            PowerState::IdleB => write!(f, "idle_b"),
            PowerState::IdleC => write!(f, "idle_c"),
            PowerState::Standby => write!(f, "standby"),
            PowerState::Sleeping => write!(f, "sleeping"),
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::Other(token) => write!(f, "{}", token),
        }
    }
}

/// Queries and changes a device's power state.
pub trait PowerControl {
    fn current_status(&self) -> Result<PowerState, SpindownError>;
    fn spin_down(&self) -> Result<(), SpindownError>;
}

/// `PowerControl` backed by the `hdparm` utility.
#[derive(Debug, Clone)]
pub struct Hdparm {
    pub program: PathBuf,
    pub device: String,
    pub timeout: Option<Duration>,
}

impl Hdparm {
    fn device_path(&self) -> String {
        format!("/dev/{}", self.device)
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl PowerControl for Hdparm {
    fn current_status(&self) -> Result<PowerState, SpindownError> {
        let program = self.program_name();
        let device = self.device_path();
        let output = run_tool(&program, &[QUERY_POWER_MODE, device.as_str()], self.timeout)?;
        if !output.success {
            log::debug!("{} -C exited unsuccessfully, parsing output anyway", program);
        }
        parse_power_state(&output.stdout)
            .map_err(|message| SpindownError::tool_invocation(&program, message))
    }

    fn spin_down(&self) -> Result<(), SpindownError> {
        let program = self.program_name();
        let device = self.device_path();
        let output = run_tool(&program, &[STANDBY_NOW, device.as_str()], self.timeout)?;
        if !output.success {
            log::warn!("{} -y {} exited unsuccessfully", program, device);
        }
        Ok(())
    }
}

/// Takes the last token of the second-to-last output line.
fn parse_power_state(stdout: &str) -> Result<PowerState, String> {
    let lines: Vec<&str> = stdout.split('\n').collect();
    if lines.len() < 2 {
        return Err(format!("unexpected output `{}`", stdout.trim()));
    }
    match lines[lines.len() - 2].split_whitespace().last() {
        Some(token) => Ok(PowerState::from_token(token)),
        None => Err(format!("no drive state in output `{}`", stdout.trim())),
    }
}

#[derive(Debug)]
struct ToolOutput {
    stdout: String,
    success: bool,
}

fn run_tool(program: &str, args: &[&str], timeout: Option<Duration>) -> Result<ToolOutput, SpindownError> {
    log::debug!("running {} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SpindownError::tool_invocation(program, e.to_string()))?;

    // drained concurrently so a chatty child cannot block on a full pipe
    let reader = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut stdout = String::new();
            pipe.read_to_string(&mut stdout).map(|_| stdout)
        })
    });

    let status = match timeout {
        None => child
            .wait()
            .map_err(|e| SpindownError::tool_invocation(program, e.to_string()))?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) if Instant::now() >= deadline => {
                        if let Err(e) = child.kill() {
                            log::warn!("unable to kill {}: {}", program, e);
                        }
                        if let Err(e) = child.wait() {
                            log::warn!("unable to reap {}: {}", program, e);
                        }
                        // the reader is left detached; a grandchild may still hold the pipe
                        return Err(SpindownError::tool_invocation(
                            program,
                            format!("timed out after {:?}", limit),
                        ));
                    }
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(e) => return Err(SpindownError::tool_invocation(program, e.to_string())),
                }
            }
        }
    };

    let stdout = match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| SpindownError::tool_invocation(program, String::from("output reader panicked")))?
            .map_err(|e| SpindownError::tool_invocation(program, e.to_string()))?,
        None => String::new(),
    };

    Ok(ToolOutput {
        stdout,
        success: status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    #[test]
    fn parses_hdparm_output() {
        let stdout = "\n/dev/sda:\n drive state is:  active/idle\n";
        assert_eq!(parse_power_state(stdout), Ok(PowerState::ActiveOrIdle));

        let stdout = "\n/dev/sdb:\n drive state is:  standby\n";
        assert_eq!(parse_power_state(stdout), Ok(PowerState::Standby));

        let stdout = "\n/dev/sdb:\n drive state is:  idle_b\n";
        assert_eq!(parse_power_state(stdout), Ok(PowerState::IdleB));
    }

    #[test]
    fn keeps_vendor_tokens() {
        let stdout = "\n/dev/sdc:\n drive state is:  NVcache_spindown\n";
        assert_eq!(
            parse_power_state(stdout),
            Ok(PowerState::Other(String::from("NVcache_spindown")))
        );
    }

    #[test]
    fn rejects_output_without_state_line() {
        assert!(parse_power_state("").is_err());
        assert!(parse_power_state("/dev/sda: no newline").is_err());
        assert!(parse_power_state("/dev/sda:\n\n").is_err());
    }

    #[test]
    fn idle_like_states() {
        assert!(PowerState::ActiveOrIdle.is_idle_like(false));
        assert!(PowerState::IdleC.is_idle_like(true));
        assert!(PowerState::Unknown.is_idle_like(false));
        assert!(!PowerState::Unknown.is_idle_like(true));
        assert!(!PowerState::Standby.is_idle_like(false));
        assert!(!PowerState::Sleeping.is_idle_like(false));
        assert!(!PowerState::Other(String::from("active")).is_idle_like(false));
    }

    #[test]
    fn display_round_trips_tokens() {
        for token in &["active/idle", "idle_a", "standby", "unknown", "vendor"] {
            assert_eq!(PowerState::from_token(token).to_string(), *token);
        }
    }

    #[test]
    fn captures_tool_output() {
        let output = run_tool(
            "sh",
            &["-c", "printf '\\n/dev/sda:\\n drive state is:  standby\\n'; exit 2"],
            Some(Duration::from_secs(10)),
        )
        .unwrap();

        assert!(!output.success);
        assert_eq!(parse_power_state(&output.stdout), Ok(PowerState::Standby));
    }

    #[test]
    fn missing_tool_is_invocation_error() {
        let hdparm = Hdparm {
            program: PathBuf::from("/nonexistent/hdparm"),
            device: String::from("sda"),
            timeout: None,
        };

        assert!(matches!(hdparm.current_status(), Err(SpindownError::ToolInvocation { .. })));
        assert!(matches!(hdparm.spin_down(), Err(SpindownError::ToolInvocation { .. })));
    }

    #[test]
    fn hung_tool_times_out() {
        let started = Instant::now();
        let result = run_tool("sh", &["-c", "sleep 5"], Some(Duration::from_millis(200)));

        match result {
            Err(SpindownError::ToolInvocation { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn drains_large_output_while_waiting() {
        let script = "head -c 200000 /dev/zero | tr '\\0' 'a'; printf '\\n/dev/sda:\\n drive state is:  standby\\n'";

        let output = run_tool("sh", &["-c", script], Some(Duration::from_secs(10))).unwrap();
        assert!(output.success);
        assert_eq!(parse_power_state(&output.stdout), Ok(PowerState::Standby));

        let output = run_tool("sh", &["-c", script], None).unwrap();
        assert!(output.stdout.len() > 200000);
    }

    fn fake_hdparm(dir: &Path, log: &Path) -> PathBuf {
        let script = dir.join("hdparm");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 echo \"$@\" >> '{}'\n\
                 if [ \"$1\" = -C ]; then\n\
                 printf '\\n%s:\\n drive state is:  idle_b\\n' \"$2\"\n\
                 exit 0\n\
                 fi\n\
                 exit 1\n",
                log.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn invokes_hdparm_with_device_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("argv");
        let hdparm = Hdparm {
            program: fake_hdparm(dir.path(), &log),
            device: String::from("sdq"),
            timeout: Some(Duration::from_secs(10)),
        };

        assert_eq!(hdparm.current_status().unwrap(), PowerState::IdleB);
        // the script exits 1 for -y; spinning down is best effort
        assert!(hdparm.spin_down().is_ok());

        assert_eq!(fs::read_to_string(&log).unwrap(), "-C /dev/sdq\n-y /dev/sdq\n");
    }
}
