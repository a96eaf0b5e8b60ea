use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::hdspindown::diskstats::DEFAULT_COUNTER_SOURCE;
use crate::hdspindown::errors::SpindownError;
use crate::hdspindown::hdparm::DEFAULT_HDPARM;
use crate::hdspindown::state::DEFAULT_STATE_FILE;
use crate::hdspindown::{run, unix_now, Config, DEFAULT_DEVICE, DEFAULT_THRESHOLD};

mod hdspindown;

fn main() {
    let greater_than_zero_value_parser = |val: &str| {
        match val.parse::<u64>() {
            Ok(num) => {
                if num < 1 {
                    return Err(String::from("value must be greater than 0"));
                }
                Ok(num)
            }
            Err(e) => Err(e.to_string())
        }
    };

    let matches = Command::new("hdspindown")
        .version("0.1.0")
        .about("Spin down an idle hard disk; meant to be run periodically from cron or a timer")
        .arg(Arg::new("device")
            .short('D')
            .long("device")
            .help("Device name as listed in the counter source")
            .default_value(DEFAULT_DEVICE)
            .value_parser(|val: &str| -> Result<String, String> {
                if val.is_empty() || val.contains('/') || val.contains(char::is_whitespace) {
                    return Err(String::from("device name must be a bare kernel name like `sda`"));
                }
                Ok(String::from(val))
            }))
        .arg(Arg::new("threshold")
            .short('t')
            .long("threshold")
            .help("Seconds without I/O before the disk is spun down (default: 600)")
            .value_parser(greater_than_zero_value_parser))
        .arg(Arg::new("state-file")
            .short('s')
            .long("state-file")
            .help("Where the last counters are kept (default: stats.json beside the executable)"))
        .arg(Arg::new("counter-source")
            .long("counter-source")
            .help("Per-device I/O counters")
            .default_value(DEFAULT_COUNTER_SOURCE))
        .arg(Arg::new("hdparm")
            .long("hdparm")
            .help("hdparm executable")
            .default_value(DEFAULT_HDPARM))
        .arg(Arg::new("tool-timeout")
            .long("tool-timeout")
            .help("Give up on hdparm after this many seconds")
            .value_parser(greater_than_zero_value_parser))
        .arg(Arg::new("strict-idle")
            .long("strict-idle")
            .help("Do not treat an `unknown` drive state as idle")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("dry-run")
            .long("dry-run")
            .help("Decide and update the stats file, but do not spin down")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("debug")
            .short('d')
            .help("Enable debug output")
            .action(ArgAction::SetTrue))
        .get_matches();

    if matches.get_flag("debug") {
        if let Err(e) = stderrlog::new()
            .verbosity(log::LevelFilter::Debug as usize)
            .module(module_path!())
            .init()
        {
            eprintln!("unable to initialise logging: {}", e);
        }
    }

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };
    log::debug!("{:?}", config);
    println!("stats file: {}", config.state_path.display());

    match run(&config, &config.tracker(), &config.power_control(), unix_now()) {
        Ok(outcome) => log::debug!("outcome {:?}", outcome),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    }
}

fn build_config(matches: &ArgMatches) -> Result<Config, SpindownError> {
    let state_path = match matches.get_one::<String>("state-file") {
        Some(path) => PathBuf::from(path),
        None => default_state_path()?,
    };

    Ok(Config {
        device: matches.get_one::<String>("device").unwrap().clone(),
        threshold: matches.get_one::<u64>("threshold").copied().unwrap_or(DEFAULT_THRESHOLD),
        state_path,
        counter_source: PathBuf::from(matches.get_one::<String>("counter-source").unwrap()),
        hdparm: PathBuf::from(matches.get_one::<String>("hdparm").unwrap()),
        tool_timeout: matches.get_one::<u64>("tool-timeout").map(|secs| Duration::from_secs(*secs)),
        strict_idle: matches.get_flag("strict-idle"),
        dry_run: matches.get_flag("dry-run"),
    })
}

fn default_state_path() -> Result<PathBuf, SpindownError> {
    let fallback = PathBuf::from(DEFAULT_STATE_FILE);
    let exe = env::current_exe()
        .and_then(|path| path.canonicalize())
        .map_err(|e| SpindownError::state_io(&fallback, e.to_string()))?;
    match exe.parent() {
        Some(dir) => Ok(dir.join(DEFAULT_STATE_FILE)),
        None => Err(SpindownError::state_io(&fallback, String::from("executable has no parent directory"))),
    }
}
